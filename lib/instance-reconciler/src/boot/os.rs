// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Phone-home handling for operating system definitions.
//!
//! Operating systems carry their own user-data and phone-home flag, which
//! instances created from them inherit. The stanza is reconciled when the
//! definition is written so that inherited user-data is already correct.

use instance_api_types::OperatingSystem;
use slog::Logger;

use crate::phone_home::{apply_phone_home, PhoneHomeError};

/// Returns the user-data to store for a new operating system definition.
///
/// User-data is only edited when phone-home is requested; otherwise it is
/// stored exactly as given.
pub fn new_os_user_data(
    log: &Logger,
    user_data: Option<&str>,
    phone_home_enabled: Option<bool>,
    phone_home_url: &str,
) -> Result<Option<String>, PhoneHomeError> {
    if phone_home_enabled != Some(true) {
        return Ok(user_data.map(str::to_owned));
    }
    apply_phone_home(log, user_data, true, phone_home_url)
}

/// Returns the user-data to store when updating `existing`.
///
/// Fields absent from the update fall back to the stored definition. If the
/// update leaves phone-home unset and the definition never had it enabled,
/// the user-data is stored exactly as merged.
pub fn updated_os_user_data(
    log: &Logger,
    user_data: Option<&str>,
    phone_home_enabled: Option<bool>,
    existing: &OperatingSystem,
    phone_home_url: &str,
) -> Result<Option<String>, PhoneHomeError> {
    let merged = user_data.or(existing.user_data.as_deref());
    let enabled = match phone_home_enabled {
        Some(enabled) => enabled,
        None if existing.phone_home_enabled => true,
        None => return Ok(merged.map(str::to_owned)),
    };
    apply_phone_home(log, merged, enabled, phone_home_url)
}

#[cfg(test)]
mod test {
    use instance_api_types::OperatingSystemType;
    use serde_yaml::Value;
    use uuid::Uuid;

    use super::*;
    use crate::document::ConfigDocument;
    use crate::phone_home::{PHONE_HOME_KEY, URL_KEY};

    const URL: &str = "http://ph.site.example";

    fn test_logger() -> Logger {
        Logger::root(slog::Discard, slog::o!())
    }

    fn stored(
        user_data: Option<&str>,
        phone_home_enabled: bool,
    ) -> OperatingSystem {
        OperatingSystem {
            id: Uuid::new_v4(),
            os_type: OperatingSystemType::Image,
            ipxe_script: None,
            user_data: user_data.map(str::to_owned),
            phone_home_enabled,
            allow_override: true,
            is_active: true,
        }
    }

    fn phone_home_url(text: &str) -> Option<String> {
        let doc = ConfigDocument::parse(text).ok()?;
        doc.get(&[PHONE_HOME_KEY, URL_KEY])
            .and_then(Value::as_str)
            .map(str::to_owned)
    }

    #[test]
    fn create_without_phone_home_keeps_text() {
        let log = test_logger();
        let text = "not: [valid";
        assert_eq!(
            new_os_user_data(&log, Some(text), None, URL).unwrap().as_deref(),
            Some(text)
        );
        assert_eq!(
            new_os_user_data(&log, Some(""), Some(false), URL).unwrap(),
            Some(String::new())
        );
    }

    #[test]
    fn create_with_phone_home_edits_text() {
        let log = test_logger();
        let out = new_os_user_data(&log, None, Some(true), URL)
            .unwrap()
            .unwrap();
        assert_eq!(phone_home_url(&out).as_deref(), Some(URL));

        let out = new_os_user_data(&log, Some("hostname: a\n"), Some(true), URL)
            .unwrap()
            .unwrap();
        assert_eq!(phone_home_url(&out).as_deref(), Some(URL));
        assert!(out.contains("hostname: a"));

        let err = new_os_user_data(&log, Some("- a\n"), Some(true), URL)
            .unwrap_err();
        assert!(matches!(err, PhoneHomeError::NotManipulable(_)));
    }

    #[test]
    fn update_falls_back_to_stored_values() {
        let log = test_logger();

        // Never enabled and not mentioned: untouched.
        let os = stored(Some("x: 1\n"), false);
        let out = updated_os_user_data(&log, Some("y: [2"), None, &os, URL)
            .unwrap();
        assert_eq!(out.as_deref(), Some("y: [2"));

        // Enabled on the stored definition: new user-data gains the stanza.
        let os = stored(None, true);
        let out = updated_os_user_data(&log, Some("y: 2\n"), None, &os, URL)
            .unwrap()
            .unwrap();
        assert_eq!(phone_home_url(&out).as_deref(), Some(URL));
    }

    #[test]
    fn update_disabling_removes_stanza() {
        let log = test_logger();
        let with_stanza =
            new_os_user_data(&log, Some("x: 1\n"), Some(true), URL)
                .unwrap()
                .unwrap();
        let os = stored(Some(&with_stanza), true);

        let out = updated_os_user_data(&log, None, Some(false), &os, URL)
            .unwrap()
            .unwrap();
        assert_eq!(phone_home_url(&out), None);
        assert!(out.contains("x: 1"));
    }
}
