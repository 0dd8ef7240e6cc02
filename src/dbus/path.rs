//! Object path naming for manager and service objects.

/// Root of the object tree; the object manager lives here.
pub const ROOT_PATH: &str = "/";

/// Path of the manager object.
pub const MANAGER_PATH: &str = "/com/canonical/UbuntuAdvantage/Manager";

/// Parent path of all service objects.
pub const SERVICES_PATH: &str = "/com/canonical/UbuntuAdvantage/Services";

/// Escape `s` for use as a single object path element.
///
/// ASCII alphanumerics are kept; every other byte, `_` included, becomes `_`
/// followed by two lowercase hex digits. An empty string becomes `_`.
pub fn escape_object_path(s: &str) -> String {
    if s.is_empty() {
        return "_".to_string();
    }
    let mut escaped = String::with_capacity(s.len());
    for byte in s.bytes() {
        if byte.is_ascii_alphanumeric() {
            escaped.push(byte as char);
        } else {
            escaped.push_str(&format!("_{byte:02x}"));
        }
    }
    escaped
}

/// Reverse [`escape_object_path`]. Returns `None` for malformed input.
pub fn unescape_object_path(s: &str) -> Option<String> {
    if s == "_" {
        return Some(String::new());
    }
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'_' => {
                let hex = s.get(i + 1..i + 3)?;
                out.push(u8::from_str_radix(hex, 16).ok()?);
                i += 3;
            }
            b if b.is_ascii_alphanumeric() => {
                out.push(b);
                i += 1;
            }
            _ => return None,
        }
    }
    String::from_utf8(out).ok()
}

/// Object path of the service named `name`.
/// e.g. "esm-apps" -> "/com/canonical/UbuntuAdvantage/Services/esm_2dapps"
pub fn service_object_path(name: &str) -> String {
    format!("{}/{}", SERVICES_PATH, escape_object_path(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_object_path() {
        assert_eq!(
            service_object_path("esm-apps"),
            "/com/canonical/UbuntuAdvantage/Services/esm_2dapps"
        );
        assert_eq!(
            service_object_path("livepatch"),
            "/com/canonical/UbuntuAdvantage/Services/livepatch"
        );
        assert_eq!(
            service_object_path("cis_audit"),
            "/com/canonical/UbuntuAdvantage/Services/cis_5faudit"
        );
    }

    #[test]
    fn test_escape_non_ascii() {
        assert_eq!(escape_object_path("é"), "_c3_a9");
        assert_eq!(escape_object_path("a b"), "a_20b");
    }

    #[test]
    fn test_escape_is_reversible() {
        for name in ["esm-apps", "fips-updates", "ros_updates", "x.y/z", "ünï", "", "_"] {
            let escaped = escape_object_path(name);
            assert!(escaped.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_'));
            assert_eq!(unescape_object_path(&escaped).as_deref(), Some(name));
        }
    }

    #[test]
    fn test_escape_is_injective() {
        assert_ne!(escape_object_path("a_2d"), escape_object_path("a-"));
    }

    #[test]
    fn test_unescape_malformed() {
        assert_eq!(unescape_object_path("esm_2"), None);
        assert_eq!(unescape_object_path("esm_zz"), None);
        assert_eq!(unescape_object_path("esm-apps"), None);
    }
}
