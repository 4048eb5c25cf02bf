//! Organization domain resolution.
//!
//! An organization may be reached on its own hostname and on
//! `<label>.<hostname>` for every subdomain label of every application it owns.
//! Applications are expected in creation order; when two of them produce the
//! same domain the later one owns it in the domain map.

use std::collections::{BTreeMap, BTreeSet};

use super::model::App;

fn app_domain(label: &str, hostname: Option<&str>) -> String {
    match hostname {
        Some(hostname) => format!("{label}.{hostname}"),
        None => label.to_string(),
    }
}

/// Every host the organization's members may be forwarded to.
#[must_use]
pub fn allowed_domains(hostname: Option<&str>, apps: &[App]) -> BTreeSet<String> {
    let hostname = hostname.filter(|hostname| !hostname.is_empty());
    let mut domains = BTreeSet::new();

    let Some(hostname) = hostname else {
        return domains;
    };

    domains.insert(hostname.to_string());
    for app in apps {
        // The main label takes the same `<label>.<hostname>` form as any other label.
        for label in &app.subdomain_labels {
            domains.insert(app_domain(label, Some(hostname)));
        }
    }

    domains
}

/// Map each application domain to the application serving it.
///
/// Without an organization hostname the bare label is used as the key.
#[must_use]
pub fn domain_app_map(hostname: Option<&str>, apps: &[App]) -> BTreeMap<String, App> {
    let hostname = hostname.filter(|hostname| !hostname.is_empty());
    let mut map = BTreeMap::new();

    for app in apps {
        for label in &app.subdomain_labels {
            map.insert(app_domain(label, hostname), app.clone());
        }
    }

    map
}
