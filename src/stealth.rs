//! Anti-detection setup for browser sessions
//!
//! - Realistic desktop user agents
//! - Chrome launch flags that hide automation
//! - Init script patching the properties bot classifiers read first
//! - Timezone/locale overrides via CDP

use std::sync::Arc;

use anyhow::Result;
use headless_chrome::protocol::cdp::Emulation::{SetLocaleOverride, SetTimezoneOverride};
use headless_chrome::protocol::cdp::Page::AddScriptToEvaluateOnNewDocument;
use headless_chrome::Tab;
use once_cell::sync::Lazy;
use rand::seq::SliceRandom;

pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36";

static USER_AGENTS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        DEFAULT_USER_AGENT,
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
        "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36 Edg/123.0.0.0",
    ]
});

/// Random user agent from the pool. Chromium-family entries only.
pub fn random_user_agent() -> &'static str {
    USER_AGENTS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(DEFAULT_USER_AGENT)
}

/// Chrome flags for a stealth session.
pub fn launch_args(user_agent: &str, headless: bool) -> Vec<String> {
    let mut args: Vec<String> = [
        "--disable-blink-features=AutomationControlled",
        "--no-sandbox",
        "--disable-dev-shm-usage",
        "--disable-infobars",
        "--window-position=0,0",
        "--ignore-certificate-errors",
        "--incognito",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    args.push(format!("--user-agent={}", user_agent));
    if headless {
        args.push("--headless=new".to_string());
    }
    args
}

/// Script registered with `Page.addScriptToEvaluateOnNewDocument`.
pub fn stealth_script() -> &'static str {
    r#"
        // navigator.webdriver is the first thing every classifier reads
        Object.defineProperty(navigator, 'webdriver', { get: () => undefined });

        Object.defineProperty(navigator, 'hardwareConcurrency', { get: () => 8 });
        Object.defineProperty(navigator, 'deviceMemory', { get: () => 8 });
        Object.defineProperty(navigator, 'languages', { get: () => ['en-US', 'en'] });

        if (!window.chrome) {
            window.chrome = {
                runtime: {
                    connect: function() {
                        return {
                            onMessage: { addListener: function() {}, removeListener: function() {} },
                            postMessage: function() {},
                            disconnect: function() {}
                        };
                    },
                    sendMessage: function() {}
                },
                app: { isInstalled: false },
                csi: function() {},
                loadTimes: function() { return { navigationType: "Other", connectionInfo: "h2" }; }
            };
        }

        const originalQuery = window.navigator.permissions && window.navigator.permissions.query;
        if (originalQuery) {
            window.navigator.permissions.query = (parameters) => (
                parameters.name === 'notifications' ?
                Promise.resolve({ state: Notification.permission }) :
                originalQuery.call(window.navigator.permissions, parameters)
            );
        }

        Object.defineProperty(navigator, 'plugins', {
            get: () => {
                const pdf = {
                    0: { type: "application/x-google-chrome-pdf", suffixes: "pdf", description: "Portable Document Format" },
                    description: "Portable Document Format",
                    filename: "internal-pdf-viewer",
                    length: 1,
                    name: "Chrome PDF Plugin"
                };
                const p = [pdf, pdf, pdf];
                Object.setPrototypeOf(p, PluginArray.prototype);
                return p;
            }
        });

        Object.defineProperty(navigator, 'mimeTypes', {
            get: () => {
                const m = [{ type: "application/pdf", suffixes: "pdf", description: "", enabledPlugin: navigator.plugins[0] }];
                Object.setPrototypeOf(m, MimeTypeArray.prototype);
                return m;
            }
        });

        const getParameter = WebGLRenderingContext.prototype.getParameter;
        WebGLRenderingContext.prototype.getParameter = function(parameter) {
            // UNMASKED_VENDOR_WEBGL / UNMASKED_RENDERER_WEBGL
            if (parameter === 37445) return 'Intel Inc.';
            if (parameter === 37446) return 'Intel Iris OpenGL Engine';
            return getParameter.apply(this, [parameter]);
        };
    "#
}

/// Register the init script and fingerprint overrides on a fresh tab.
pub fn harden_tab(tab: &Arc<Tab>, timezone_id: &str, locale: &str) -> Result<()> {
    tab.call_method(AddScriptToEvaluateOnNewDocument {
        source: stealth_script().to_string(),
        world_name: None,
        include_command_line_api: None,
        run_immediately: None,
    })?;

    tab.call_method(SetTimezoneOverride {
        timezone_id: timezone_id.to_string(),
    })?;
    tab.call_method(SetLocaleOverride {
        locale: Some(locale.to_string()),
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stealth_script_patches_webdriver() {
        let script = stealth_script();
        assert!(script.contains("Object.defineProperty(navigator, 'webdriver'"));
        assert!(script.contains("window.chrome = {"));
        assert!(script.contains("WebGLRenderingContext.prototype.getParameter"));
    }

    #[test]
    fn test_launch_args_carry_user_agent() {
        let args = launch_args("UA/1.0", true);
        assert!(args.contains(&"--user-agent=UA/1.0".to_string()));
        assert!(args.contains(&"--headless=new".to_string()));
        assert!(args.contains(&"--disable-blink-features=AutomationControlled".to_string()));

        let headful = launch_args("UA/1.0", false);
        assert!(!headful.iter().any(|a| a.starts_with("--headless")));
    }

    #[test]
    fn test_random_user_agent_is_chromium() {
        for _ in 0..20 {
            assert!(random_user_agent().contains("Chrome/"));
        }
    }
}
