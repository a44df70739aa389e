//! Context profiler
//!
//! Turns what the host environment exposes into a [`DeviceInfo`] snapshot.
//! Pure: the same environment always yields the same snapshot.

use crate::types::{DeviceClass, DeviceInfo, Viewport};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Raw facts read from the host at session start
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RawEnvironment {
    pub user_agent: String,
    pub viewport_width: u32,
    pub viewport_height: u32,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
}

static MOBILE_UA: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)mobi|iphone|ipod|android|blackberry|opera mini|iemobile")
        .expect("Valid mobile regex")
});

static BROWSER_UA: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(Edg|OPR|Firefox|Chrome|Version)/(\d+)").expect("Valid browser regex")
});

/// Classify the environment into a device snapshot
pub fn profile(env: &RawEnvironment) -> DeviceInfo {
    DeviceInfo {
        device_class: device_class(&env.user_agent, env.viewport_width),
        os: operating_system(&env.user_agent).to_string(),
        browser: browser(&env.user_agent),
        viewport: Viewport {
            width: env.viewport_width,
            height: env.viewport_height,
        },
        locale: env
            .language
            .as_deref()
            .filter(|l| !l.trim().is_empty())
            .unwrap_or("und")
            .to_string(),
        timezone: env
            .timezone
            .as_deref()
            .filter(|tz| !tz.trim().is_empty())
            .unwrap_or("UTC")
            .to_string(),
    }
}

fn device_class(user_agent: &str, viewport_width: u32) -> DeviceClass {
    if user_agent.trim().is_empty() {
        // Headless or stripped UA: fall back to layout breakpoints
        return match viewport_width {
            0 => DeviceClass::Desktop,
            w if w < 768 => DeviceClass::Mobile,
            w if w < 1024 => DeviceClass::Tablet,
            _ => DeviceClass::Desktop,
        };
    }
    if is_tablet(user_agent) {
        DeviceClass::Tablet
    } else if MOBILE_UA.is_match(user_agent) {
        DeviceClass::Mobile
    } else {
        DeviceClass::Desktop
    }
}

// The regex crate has no lookahead, so "android without mobi" is checked by hand
fn is_tablet(user_agent: &str) -> bool {
    let lower = user_agent.to_ascii_lowercase();
    if lower.contains("android") && !lower.contains("mobi") {
        return true;
    }
    ["ipad", "tablet", "kindle", "silk", "playbook"]
        .iter()
        .any(|needle| lower.contains(needle))
}

fn operating_system(user_agent: &str) -> &'static str {
    let lower = user_agent.to_ascii_lowercase();
    if lower.contains("iphone") || lower.contains("ipad") || lower.contains("ipod") {
        "iOS"
    } else if lower.contains("android") {
        "Android"
    } else if lower.contains("windows") {
        "Windows"
    } else if lower.contains("mac os x") || lower.contains("macintosh") {
        "macOS"
    } else if lower.contains("cros") {
        "ChromeOS"
    } else if lower.contains("linux") {
        "Linux"
    } else {
        "unknown"
    }
}

fn browser(user_agent: &str) -> String {
    // First match wins, and Chromium derivatives advertise their own token before "Chrome/"
    let mut found: Option<(&str, &str)> = None;
    for caps in BROWSER_UA.captures_iter(user_agent) {
        let (Some(name), Some(major)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        let name = name.as_str();
        let rank = |n: &str| match n {
            "Edg" => 0,
            "OPR" => 1,
            "Firefox" => 2,
            "Chrome" => 3,
            _ => 4,
        };
        if found.map_or(true, |(current, _)| rank(name) < rank(current)) {
            found = Some((name, major.as_str()));
        }
    }
    match found {
        Some(("Edg", v)) => format!("Edge {}", v),
        Some(("OPR", v)) => format!("Opera {}", v),
        Some(("Version", v)) if user_agent.contains("Safari") => format!("Safari {}", v),
        Some(("Version", _)) => "unknown".to_string(),
        Some((name, v)) => format!("{} {}", name, v),
        None => "unknown".to_string(),
    }
}
