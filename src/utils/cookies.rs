// Auth cookie construction. Both cookies are HTTP-only, Secure and
// SameSite=Strict; the access cookie covers the whole API surface while the
// refresh cookie is scoped down to the auth endpoints.

use axum_extra::extract::cookie::{Cookie, SameSite};
use chrono::{DateTime, Utc};
use time::Duration;

pub const ACCESS_COOKIE: &str = "accessToken";
pub const REFRESH_COOKIE: &str = "refreshToken";

pub const ACCESS_COOKIE_PATH: &str = "/api/v1";
pub const REFRESH_COOKIE_PATH: &str = "/api/v1/auth";

fn seconds_until(expires_at: DateTime<Utc>) -> i64 {
    (expires_at - Utc::now()).num_seconds().max(0)
}

pub fn build_access_cookie(token: String, expires_at: DateTime<Utc>) -> Cookie<'static> {
    Cookie::build((ACCESS_COOKIE, token))
        .path(ACCESS_COOKIE_PATH)
        .http_only(true)
        .secure(true)
        .same_site(SameSite::Strict)
        .max_age(Duration::seconds(seconds_until(expires_at)))
        .build()
}

pub fn build_refresh_cookie(token: String, expires_at: DateTime<Utc>) -> Cookie<'static> {
    Cookie::build((REFRESH_COOKIE, token))
        .path(REFRESH_COOKIE_PATH)
        .http_only(true)
        .secure(true)
        .same_site(SameSite::Strict)
        .max_age(Duration::seconds(seconds_until(expires_at)))
        .build()
}

/// Expired cookies that instruct the browser to drop both tokens
pub fn clear_auth_cookies() -> (Cookie<'static>, Cookie<'static>) {
    let access = Cookie::build((ACCESS_COOKIE, ""))
        .path(ACCESS_COOKIE_PATH)
        .http_only(true)
        .secure(true)
        .same_site(SameSite::Strict)
        .max_age(Duration::seconds(-1))
        .build();

    let refresh = Cookie::build((REFRESH_COOKIE, ""))
        .path(REFRESH_COOKIE_PATH)
        .http_only(true)
        .secure(true)
        .same_site(SameSite::Strict)
        .max_age(Duration::seconds(-1))
        .build();

    (access, refresh)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn test_access_cookie_attributes() {
        let cookie = build_access_cookie("tok".into(), Utc::now() + ChronoDuration::minutes(15));
        assert_eq!(cookie.name(), ACCESS_COOKIE);
        assert_eq!(cookie.path(), Some(ACCESS_COOKIE_PATH));
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Strict));
    }

    #[test]
    fn test_refresh_cookie_scoped_to_auth() {
        let cookie = build_refresh_cookie("tok".into(), Utc::now() + ChronoDuration::days(7));
        assert_eq!(cookie.path(), Some(REFRESH_COOKIE_PATH));
    }

    #[test]
    fn test_clear_cookies_expire_immediately() {
        let (access, refresh) = clear_auth_cookies();
        assert!(access.max_age().unwrap().is_negative());
        assert!(refresh.max_age().unwrap().is_negative());
        assert!(access.value().is_empty());
        assert!(refresh.value().is_empty());
    }
}
