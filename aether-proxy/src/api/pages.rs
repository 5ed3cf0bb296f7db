//! HTML pages served by the proxy itself

use aether_core::dto::proxy::AppInfo;

use crate::config::ProxyConfig;

const STYLE: &str = "body { font-family: system-ui; max-width: 800px; margin: 50px auto; padding: 20px; }
      h1 { color: #333; }
      .app-card { border: 1px solid #ddd; padding: 15px; margin: 10px 0; border-radius: 8px; background: #f9f9f9; }
      .app-link { color: #0070f3; text-decoration: none; font-weight: bold; font-size: 18px; }
      .app-info { color: #666; margin-top: 5px; }
      code { background: #eee; padding: 2px 6px; border-radius: 3px; font-family: monospace; }";

/// Landing page listing every registered app
pub fn listing_page(config: &ProxyConfig, apps: &[AppInfo]) -> String {
    let cards = if apps.is_empty() {
        r#"<p style="color: #999; font-style: italic;">No apps running. Deploy a PR to see it here!</p>"#
            .to_string()
    } else {
        apps.iter()
            .map(|app| {
                let url = escape(&config.public_url(&app.id));
                format!(
                    r#"<div class="app-card">
        <a class="app-link" href="{url}" target="_blank">{id}</a>
        <div class="app-info"><span>Port: {port}</span> &middot; <span>URL: <code>{url}</code></span></div>
      </div>"#,
                    url = url,
                    id = escape(&app.id),
                    port = app.port,
                )
            })
            .collect::<Vec<_>>()
            .join("\n      ")
    };

    format!(
        r#"<!DOCTYPE html>
<html>
  <head>
    <title>Aether Reverse Proxy</title>
    <style>
      {style}
    </style>
  </head>
  <body>
    <h1>Aether Reverse Proxy</h1>
    <p>Active deployments: <strong>{count}</strong></p>
    <p>Access apps using subdomains: <code>{pattern}</code></p>
    <div>
      {cards}
    </div>
  </body>
</html>
"#,
        style = STYLE,
        count = apps.len(),
        pattern = escape(&config.public_host("<appId>")),
        cards = cards,
    )
}

pub fn not_found_page(app_id: &str, listing_url: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
  <body style="font-family: system-ui; max-width: 600px; margin: 100px auto; text-align: center;">
    <h1>404 - App Not Found</h1>
    <p>No deployment found for: <code>{}</code></p>
    <p><a href="{}">View active deployments</a></p>
  </body>
</html>
"#,
        escape(app_id),
        escape(listing_url)
    )
}

pub fn bad_gateway_page(app_id: &str, listing_url: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
  <body style="font-family: system-ui; max-width: 600px; margin: 100px auto; text-align: center;">
    <h1>502 - Bad Gateway</h1>
    <p>Unable to reach application: <code>{}</code></p>
    <p><a href="{}">View active deployments</a></p>
  </body>
</html>
"#,
        escape(app_id),
        escape(listing_url)
    )
}

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listing_page_empty() {
        let page = listing_page(&ProxyConfig::default(), &[]);
        assert!(page.contains("No apps running"));
        assert!(page.contains("<strong>0</strong>"));
    }

    #[test]
    fn test_listing_page_links_apps() {
        let apps = vec![AppInfo {
            id: "acme-pr1".to_string(),
            port: 5001,
            subdomain: "acme-pr1.localhost:8080".to_string(),
        }];
        let page = listing_page(&ProxyConfig::default(), &apps);
        assert!(page.contains(r#"href="http://acme-pr1.localhost:8080""#));
        assert!(page.contains("Port: 5001"));
    }

    #[test]
    fn test_not_found_page_escapes_input() {
        let page = not_found_page("<script>", "http://localhost:8080");
        assert!(page.contains("&lt;script&gt;"));
        assert!(!page.contains("<script>"));
        assert!(page.contains(r#"href="http://localhost:8080""#));
    }
}
