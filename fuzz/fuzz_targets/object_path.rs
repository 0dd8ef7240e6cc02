//! Fuzz target for object path escaping.
//!
//! Every service name must map to a valid object path element that
//! unescapes back to the same name.

#![no_main]

use libfuzzer_sys::fuzz_target;
use ua_daemon::dbus::{escape_object_path, service_object_path, unescape_object_path};

fuzz_target!(|name: &str| {
    let escaped = escape_object_path(name);
    assert!(!escaped.is_empty());
    assert!(escaped.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_'));
    assert_eq!(unescape_object_path(&escaped).as_deref(), Some(name));

    let path = service_object_path(name);
    assert!(zbus::zvariant::ObjectPath::try_from(path.as_str()).is_ok());

    // Arbitrary input must never panic the decoder.
    let _ = unescape_object_path(name);
});
