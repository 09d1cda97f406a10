//! Region-aware endpoint resolution
//!
//! Produces absolute URLs for Graph and auth resources given a [`Region`]
//! and tenant/application ids. Pure and synchronous: no network access, no
//! shared state.

use tracing::warn;

/// A Microsoft cloud region. Each maps to a distinct auth host and graph
/// host pair; national clouds and the DoD cloud never share a host with
/// Global.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Region {
    Global,
    Usl4,
    Usl5,
    De,
    Cn,
}

impl Region {
    /// Parses a configuration string, falling back to [`Region::Global`]
    /// with a warning for anything unrecognised.
    pub fn parse(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "global" | "" => Region::Global,
            "usl4" | "us-gov" | "usgov" => Region::Usl4,
            "usl5" | "us-gov-dod" | "dod" => Region::Usl5,
            "de" | "germany" => Region::De,
            "cn" | "china" => Region::Cn,
            other => {
                warn!(region = other, "unknown region, falling back to Global");
                Region::Global
            }
        }
    }

    fn auth_host(self) -> &'static str {
        match self {
            Region::Global => "login.microsoftonline.com",
            Region::Usl4 => "login.microsoftonline.us",
            Region::Usl5 => "login.microsoftonline.us",
            Region::De => "login.microsoftonline.de",
            Region::Cn => "login.chinacloudapi.cn",
        }
    }

    fn graph_host(self) -> &'static str {
        match self {
            Region::Global => "graph.microsoft.com",
            Region::Usl4 => "graph.microsoft.us",
            Region::Usl5 => "dod-graph.microsoft.us",
            Region::De => "graph.microsoft.de",
            Region::Cn => "microsoftgraph.chinacloudapi.cn",
        }
    }
}

/// Resolved URL templates for one (region, tenant, application, drive)
/// combination. Fields are plain strings rather than a trait so callers can
/// append query parameters and path segments freely.
#[derive(Debug, Clone)]
pub struct EndpointSet {
    /// Bare `https://{graph_host}/v1.0` prefix, with no path appended.
    /// What [`crate::client::GraphClient`] prepends to every relative path
    /// it is asked to request.
    pub graph_url: String,
    pub drive_url: String,
    pub drive_by_id_url: String,
    pub item_by_id_url: String,
    pub item_by_path_url: String,
    pub shared_with_me_url: String,
    pub site_search_url: String,
    pub site_drive_url: String,
    pub subscription_url: String,
    pub auth_url: String,
    pub device_auth_url: String,
    pub redirect_url: String,
    pub token_url: String,
}

/// The well-known "common multi-tenant" application id shipped by this
/// crate's own first-party registration. Only this id is subject to the
/// global-redirect-host exception in non-global regions.
pub const DEFAULT_APPLICATION_ID: &str = "00000000-0000-0000-0000-000000000000";

/// Bare `https://{graph_host}/v1.0` prefix for a region, with no tenant or
/// drive rebasing applied. Used by callers that only need the base URL a
/// relative path gets appended to, not the full [`EndpointSet`].
pub fn graph_base_url(region: Region) -> String {
    format!("https://{}/v1.0", region.graph_host())
}

/// Produces the full set of absolute URL templates for a region/tenant/
/// application/drive combination.
///
/// If `explicit_drive_id` is set, `drive_url` and the item templates rebase
/// onto `/drives/{id}` instead of `/me/drive`.
pub fn resolve(
    region: Region,
    tenant_id: &str,
    application_id: &str,
    redirect_uri: &str,
    explicit_drive_id: Option<&str>,
) -> EndpointSet {
    let graph = format!("https://{}/v1.0", region.graph_host());
    let auth_host = region.auth_host();

    let drive_root = match explicit_drive_id {
        Some(id) => format!("{graph}/drives/{id}"),
        None => format!("{graph}/me/drive"),
    };

    // Microsoft Entra restriction: in a non-global region with the default
    // shared application id, the redirect_uri must stay on the global host.
    let redirect_url = if region != Region::Global && application_id == DEFAULT_APPLICATION_ID {
        rehost_to_global(redirect_uri)
    } else {
        redirect_uri.to_string()
    };

    EndpointSet {
        graph_url: graph.clone(),
        drive_url: drive_root.clone(),
        drive_by_id_url: format!("{graph}/drives"),
        item_by_id_url: format!("{drive_root}/items"),
        item_by_path_url: format!("{drive_root}/root:"),
        shared_with_me_url: format!("{graph}/me/drive/sharedWithMe"),
        site_search_url: format!("{graph}/sites?search="),
        site_drive_url: format!("{graph}/sites"),
        subscription_url: format!("{graph}/subscriptions"),
        auth_url: format!("https://{auth_host}/{tenant_id}/oauth2/v2.0/authorize"),
        device_auth_url: format!("https://{auth_host}/{tenant_id}/oauth2/v2.0/devicecode"),
        redirect_url,
        token_url: format!("https://{auth_host}/{tenant_id}/oauth2/v2.0/token"),
    }
}

fn rehost_to_global(redirect_uri: &str) -> String {
    match url::Url::parse(redirect_uri) {
        Ok(mut u) => {
            let _ = u.set_host(Some("login.microsoftonline.com"));
            u.to_string()
        }
        Err(_) => redirect_uri.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_parse_recognises_all_variants() {
        assert_eq!(Region::parse("global"), Region::Global);
        assert_eq!(Region::parse("USL4"), Region::Usl4);
        assert_eq!(Region::parse("usl5"), Region::Usl5);
        assert_eq!(Region::parse("DE"), Region::De);
        assert_eq!(Region::parse("cn"), Region::Cn);
    }

    #[test]
    fn region_parse_unknown_falls_back_to_global() {
        assert_eq!(Region::parse("mars"), Region::Global);
        assert_eq!(Region::parse(""), Region::Global);
    }

    #[test]
    fn graph_base_url_matches_the_region_host() {
        assert_eq!(graph_base_url(Region::Global), "https://graph.microsoft.com/v1.0");
        assert_eq!(graph_base_url(Region::Cn), "https://microsoftgraph.chinacloudapi.cn/v1.0");
    }

    #[test]
    fn resolved_graph_url_matches_graph_base_url() {
        let set = resolve(Region::De, "tenant", "app-id", "http://127.0.0.1/cb", None);
        assert_eq!(set.graph_url, graph_base_url(Region::De));
    }

    #[test]
    fn global_hosts_are_default_microsoft_hosts() {
        let set = resolve(Region::Global, "common", "app-id", "http://127.0.0.1/cb", None);
        assert!(set.drive_url.contains("graph.microsoft.com"));
        assert!(set.auth_url.contains("login.microsoftonline.com"));
    }

    #[test]
    fn cn_region_never_touches_global_hosts() {
        let set = resolve(Region::Cn, "tenant", "some-app-id", "http://127.0.0.1/cb", None);
        for url in [
            &set.drive_url,
            &set.drive_by_id_url,
            &set.item_by_id_url,
            &set.item_by_path_url,
            &set.shared_with_me_url,
            &set.site_search_url,
            &set.subscription_url,
            &set.auth_url,
            &set.device_auth_url,
            &set.token_url,
        ] {
            assert!(!url.contains("graph.microsoft.com"));
            assert!(!url.contains("login.microsoftonline.com"));
        }
        assert!(set.drive_url.contains("microsoftgraph.chinacloudapi.cn"));
        assert!(set.auth_url.contains("login.chinacloudapi.cn"));
    }

    #[test]
    fn explicit_drive_id_rebases_item_templates() {
        let set = resolve(Region::Global, "common", "app-id", "http://127.0.0.1/cb", Some("b!abc123"));
        assert!(set.drive_url.contains("/drives/b!abc123"));
        assert!(set.item_by_id_url.starts_with(&set.drive_url));
    }

    #[test]
    fn default_app_id_in_non_global_region_keeps_global_redirect_host() {
        let set = resolve(
            Region::Cn,
            "tenant",
            DEFAULT_APPLICATION_ID,
            "http://127.0.0.1:8400/callback",
            None,
        );
        assert!(set.redirect_url.contains("login.microsoftonline.com"));
    }

    #[test]
    fn non_default_app_id_in_non_global_region_keeps_its_own_redirect() {
        let set = resolve(
            Region::Cn,
            "tenant",
            "custom-app-id",
            "http://127.0.0.1:8400/callback",
            None,
        );
        assert_eq!(set.redirect_url, "http://127.0.0.1:8400/callback");
    }
}
