// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Inserts and removes the cloud-init `phone_home` stanza a booted machine
//! uses to report readiness to the site.

use serde_yaml::Value;
use slog::{info, warn, Logger};
use thiserror::Error;

use crate::document::{ConfigDocument, DocumentError, Unmanipulable};

pub const PHONE_HOME_KEY: &str = "phone_home";
pub const URL_KEY: &str = "url";
pub const POST_KEY: &str = "post";
pub const POST_ALL: &str = "all";
pub const CLOUD_CONFIG_HEADER: &str = "#cloud-config";

#[derive(Debug, Error)]
pub enum PhoneHomeError {
    #[error("must be valid cloud-init YAML to enable phone home: {0}")]
    NotManipulable(Unmanipulable),

    #[error("failed to insert phone-home into userData")]
    Insert(#[source] DocumentError),

    #[error(
        "failed to re-construct userData after processing phone home config"
    )]
    Render(#[source] DocumentError),
}

impl PhoneHomeError {
    pub fn field(&self) -> &'static str {
        "userData"
    }
}

/// Adds a stanza pointing at `url`, replacing any stanza already present.
///
/// The new stanza is appended after the document's other top-level keys,
/// and the preamble gains a `#cloud-config` line if it lacks one.
pub fn enable_phone_home(
    doc: &mut ConfigDocument,
    url: &str,
) -> Result<(), PhoneHomeError> {
    doc.remove_key(&[PHONE_HOME_KEY]);

    *doc.find_or_insert_key(&[PHONE_HOME_KEY, URL_KEY])
        .map_err(PhoneHomeError::Insert)? = Value::from(url);
    *doc.find_or_insert_key(&[PHONE_HOME_KEY, POST_KEY])
        .map_err(PhoneHomeError::Insert)? = Value::from(POST_ALL);

    doc.ensure_preamble_line(CLOUD_CONFIG_HEADER);
    Ok(())
}

/// Removes the stanza if it points at `url`. A stanza naming some other URL
/// belongs to the tenant and is left alone. Returns true if a stanza was
/// removed.
pub fn disable_phone_home(doc: &mut ConfigDocument, url: &str) -> bool {
    let ours = doc
        .get(&[PHONE_HOME_KEY, URL_KEY])
        .and_then(Value::as_str)
        .is_some_and(|u| u == url);

    ours && doc.remove_key(&[PHONE_HOME_KEY])
}

/// Returns the user-data for a machine that has no user-data of its own but
/// should phone home.
pub fn default_document(url: &str) -> Result<String, PhoneHomeError> {
    let mut doc = ConfigDocument::new();
    enable_phone_home(&mut doc, url)?;
    doc.serialize().map_err(PhoneHomeError::Render)
}

/// Brings `user_data` in line with the desired phone-home setting and
/// returns the text to store. `None` means the instance has no user-data.
///
/// Enabling requires the user-data to be an editable document (or to be
/// absent, in which case a minimal document is synthesized). Disabling is
/// attempted opportunistically: user-data that cannot be edited is returned
/// as-is, and user-data left with no keys once the stanza is gone is
/// dropped.
pub fn apply_phone_home(
    log: &Logger,
    user_data: Option<&str>,
    enabled: bool,
    url: &str,
) -> Result<Option<String>, PhoneHomeError> {
    let Some(text) = user_data.filter(|t| !t.is_empty()) else {
        if enabled {
            info!(log, "synthesizing phone-home user-data"; "url" => url);
            return default_document(url).map(Some);
        }
        return Ok(None);
    };

    let mut doc = match ConfigDocument::parse(text) {
        Ok(doc) => doc,
        Err(reason) if enabled => {
            return Err(PhoneHomeError::NotManipulable(reason));
        }
        Err(reason) => {
            warn!(log, "leaving non-editable user-data untouched";
                "reason" => %reason);
            return Ok(Some(text.to_owned()));
        }
    };

    if enabled {
        enable_phone_home(&mut doc, url)?;
        info!(log, "inserted phone-home stanza"; "url" => url);
    } else {
        let removed = disable_phone_home(&mut doc, url);
        if removed {
            info!(log, "removed phone-home stanza"; "url" => url);
        }
        if doc.is_empty() {
            return Ok(None);
        }
        if !removed {
            return Ok(Some(text.to_owned()));
        }
    }

    doc.serialize().map(Some).map_err(PhoneHomeError::Render)
}
