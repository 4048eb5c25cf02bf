use clap::{
    builder::styling::{AnsiColor, Effects, Styles},
    Arg, ColorChoice, Command,
};
use std::path::PathBuf;

pub mod logging;

pub const ARG_PORT: &str = "port";
pub const ARG_DSN: &str = "dsn";
pub const ARG_KEYDB_URL: &str = "keydb-url";
pub const ARG_AUTH_LOGIN_URL: &str = "auth-login-url";
pub const ARG_ERROR_LOGIN_URL: &str = "error-login-url";
pub const ARG_GEOIP_DB_PATH: &str = "geoip-db-path";
pub const ARG_LOOKUP_TIMEOUT_MS: &str = "lookup-timeout-ms";
pub const ARG_CORS_ORIGINS: &str = "cors-origins";

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let command = Command::new("vondr-gate")
        .about("Forward-auth decisions for reverse proxies")
        .version(env!("CARGO_PKG_VERSION"))
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new(ARG_PORT)
                .short('p')
                .long("port")
                .help("Port to listen on")
                .default_value("8000")
                .env("VONDR_GATE_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new(ARG_DSN)
                .short('d')
                .long("dsn")
                .help("Database connection string")
                .env("VONDR_GATE_DSN")
                .required(true),
        )
        .arg(
            Arg::new(ARG_KEYDB_URL)
                .long("keydb-url")
                .help("KeyDB/Redis URL holding login sessions, example: redis://keydb:6379/0")
                .env("VONDR_GATE_KEYDB_URL")
                .required(true),
        )
        .arg(
            Arg::new(ARG_AUTH_LOGIN_URL)
                .long("auth-login-url")
                .help("Login page browsers are sent to without a valid session, example: https://auth.vondr.ai/login")
                .env("VONDR_GATE_AUTH_LOGIN_URL")
                .required(true),
        )
        .arg(
            Arg::new(ARG_ERROR_LOGIN_URL)
                .long("error-login-url")
                .help("Error page base URL, browsers land on <url>/<status>/<reason>")
                .env("VONDR_GATE_ERROR_LOGIN_URL")
                .required(true),
        )
        .arg(
            Arg::new(ARG_GEOIP_DB_PATH)
                .long("geoip-db-path")
                .help("MaxMind country database (.mmdb); country rules deny when unset")
                .env("VONDR_GATE_GEOIP_DB_PATH")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new(ARG_LOOKUP_TIMEOUT_MS)
                .long("lookup-timeout-ms")
                .help("Upper bound for each store or GeoIP lookup, in milliseconds")
                .default_value("3000")
                .env("VONDR_GATE_LOOKUP_TIMEOUT_MS")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_CORS_ORIGINS)
                .long("cors-origins")
                .help("Comma separated origins allowed to call the service from a browser")
                .env("VONDR_GATE_CORS_ORIGINS"),
        );

    logging::with_args(command)
}
