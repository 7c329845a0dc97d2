//! `Set-Cookie` parsing and re-serialization.

use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};

/// Cookie expiry formats seen in the wild, tried in order after RFC 2822.
const EXPIRES_FORMATS: &[&str] = &["%a, %d-%b-%Y %H:%M:%S GMT", "%a, %d-%b-%y %H:%M:%S GMT", "%A, %d-%b-%y %H:%M:%S GMT"];

/// One `Set-Cookie` directive.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SetCookie {
    pub name: String,
    pub value: String,
    pub expires: Option<DateTime<Utc>>,
    pub max_age: Option<i64>,
    pub same_site: Option<String>,
    pub http_only: bool,
    pub secure: bool,
    pub path: Option<String>,
    pub domain: Option<String>,
    /// Unrecognized attributes, verbatim.
    pub extensions: Vec<String>,
}

impl SetCookie {
    /// Parse a single `Set-Cookie` value. Returns `None` without a `name=` pair.
    ///
    /// Attributes whose values do not parse are dropped.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut parts = raw.split(';');
        let (name, value) = parts.next()?.split_once('=')?;
        let name = name.trim();
        if name.is_empty() {
            return None;
        }

        let mut cookie = SetCookie {
            name: name.to_string(),
            value: value.trim().to_string(),
            ..Default::default()
        };

        for part in parts.map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = match part.split_once('=') {
                Some((k, v)) => (k.trim(), Some(v.trim())),
                None => (part, None),
            };
            match (key.to_ascii_lowercase().as_str(), value) {
                ("expires", Some(v)) => match parse_expires(v) {
                    Some(at) => cookie.expires = Some(at),
                    None => tracing::debug!(value = v, cookie = %cookie.name, "Dropping unparseable Expires"),
                },
                ("max-age", Some(v)) => match v.parse() {
                    Ok(secs) => cookie.max_age = Some(secs),
                    Err(_) => tracing::debug!(value = v, cookie = %cookie.name, "Dropping unparseable Max-Age"),
                },
                ("samesite", Some(v)) => cookie.same_site = Some(v.to_string()),
                ("path", Some(v)) => cookie.path = Some(v.to_string()),
                ("domain", Some(v)) => cookie.domain = Some(v.to_string()),
                ("httponly", _) => cookie.http_only = true,
                ("secure", _) => cookie.secure = true,
                _ => cookie.extensions.push(part.to_string()),
            }
        }
        Some(cookie)
    }
}

fn parse_expires(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(at) = DateTime::parse_from_rfc2822(value) {
        return Some(at.with_timezone(&Utc));
    }
    EXPIRES_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|naive| naive.and_utc())
}

impl fmt::Display for SetCookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.value)?;
        if let Some(expires) = self.expires {
            write!(f, "; Expires={}", expires.format("%a, %d %b %Y %H:%M:%S GMT"))?;
        }
        if let Some(max_age) = self.max_age {
            write!(f, "; Max-Age={max_age}")?;
        }
        if let Some(domain) = &self.domain {
            write!(f, "; Domain={domain}")?;
        }
        if let Some(path) = &self.path {
            write!(f, "; Path={path}")?;
        }
        if self.secure {
            f.write_str("; Secure")?;
        }
        if self.http_only {
            f.write_str("; HttpOnly")?;
        }
        if let Some(same_site) = &self.same_site {
            write!(f, "; SameSite={same_site}")?;
        }
        for extension in &self.extensions {
            write!(f, "; {extension}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_attributes() {
        let cookie = SetCookie::parse("b=2; Max-Age=60; Path=/; SameSite=Lax; HttpOnly").unwrap();
        assert_eq!(cookie.name, "b");
        assert_eq!(cookie.value, "2");
        assert_eq!(cookie.max_age, Some(60));
        assert_eq!(cookie.same_site.as_deref(), Some("Lax"));
        assert!(cookie.http_only);
        assert_eq!(cookie.to_string(), "b=2; Max-Age=60; Path=/; HttpOnly; SameSite=Lax");
    }

    #[test]
    fn test_expires_formats() {
        let expected = Utc.with_ymd_and_hms(2030, 1, 9, 10, 18, 14).unwrap();
        let rfc = SetCookie::parse("a=1; Expires=Wed, 09 Jan 2030 10:18:14 GMT").unwrap();
        assert_eq!(rfc.expires, Some(expected));
        let dashed = SetCookie::parse("a=1; expires=Wed, 09-Jan-2030 10:18:14 GMT").unwrap();
        assert_eq!(dashed.expires, Some(expected));
        assert_eq!(rfc.to_string(), "a=1; Expires=Wed, 09 Jan 2030 10:18:14 GMT");
    }

    #[test]
    fn test_invalid_values_dropped() {
        let cookie = SetCookie::parse("a=1; Max-Age=soon; Expires=someday; Secure").unwrap();
        assert_eq!(cookie.max_age, None);
        assert_eq!(cookie.expires, None);
        assert_eq!(cookie.to_string(), "a=1; Secure");
    }

    #[test]
    fn test_unknown_attributes_kept() {
        let cookie = SetCookie::parse("sid=x=y; Partitioned; Priority=High").unwrap();
        assert_eq!(cookie.value, "x=y");
        assert_eq!(cookie.to_string(), "sid=x=y; Partitioned; Priority=High");
    }

    #[test]
    fn test_rejects_nameless() {
        assert!(SetCookie::parse("no-equals-sign").is_none());
        assert!(SetCookie::parse("=value").is_none());
    }
}
