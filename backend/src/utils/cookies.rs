use std::time::Duration;

/// Session cookies are always `HttpOnly; SameSite=Lax`; only `Secure`
/// varies by environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CookieOptions {
    pub secure: bool,
}

pub const SESSION_COOKIE_NAME: &str = "token";
pub const SESSION_COOKIE_PATH: &str = "/";

pub fn build_session_cookie(value: &str, max_age: Duration, options: CookieOptions) -> String {
    let mut cookie = format!(
        "{}={}; Path={}; Max-Age={}; HttpOnly; SameSite=Lax",
        SESSION_COOKIE_NAME,
        value,
        SESSION_COOKIE_PATH,
        max_age.as_secs()
    );
    if options.secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// Expires the session cookie with the same attributes it was set with.
pub fn build_clear_session_cookie(options: CookieOptions) -> String {
    let mut cookie = format!(
        "{}=; Path={}; Max-Age=0; HttpOnly; SameSite=Lax",
        SESSION_COOKIE_NAME, SESSION_COOKIE_PATH
    );
    if options.secure {
        cookie.push_str("; Secure");
    }
    cookie
}

pub fn extract_cookie_value(header: &str, name: &str) -> Option<String> {
    header.split(';').map(str::trim).find_map(|pair| {
        let mut parts = pair.splitn(2, '=');
        let key = parts.next()?.trim();
        let value = parts.next()?.trim();
        if key == name && !value.is_empty() {
            Some(value.to_string())
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_cookie_includes_security_attributes() {
        let opts = CookieOptions { secure: true };
        let cookie = build_session_cookie("abc", Duration::from_secs(3600), opts);
        assert!(cookie.starts_with("token=abc"));
        assert!(cookie.contains("Path=/"));
        assert!(cookie.contains("Max-Age=3600"));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("SameSite=Lax"));
        assert!(cookie.contains("Secure"));
    }

    #[test]
    fn clear_cookie_sets_max_age_zero() {
        let opts = CookieOptions { secure: false };
        let cookie = build_clear_session_cookie(opts);
        assert!(cookie.starts_with("token=;"));
        assert!(cookie.contains("Path=/"));
        assert!(cookie.contains("Max-Age=0"));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("SameSite=Lax"));
        assert!(!cookie.contains("Secure"));
    }

    #[test]
    fn extract_cookie_value_finds_matching_name() {
        let header = "theme=dark; token=token-value; b=2";
        assert_eq!(
            extract_cookie_value(header, "token").as_deref(),
            Some("token-value")
        );
        assert!(extract_cookie_value(header, "missing").is_none());
        assert!(extract_cookie_value("token=", "token").is_none());
    }
}
