// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `sign-spec` batch-signing configuration (§4.L, ambient): a YAML file
//! naming reusable key/certificate profiles plus a list of files to run
//! through them, so a release job can sign a whole output directory with one
//! invocation instead of one `sign` per artifact.

use {
    crate::{
        digest::DigestAlgorithm,
        engine::{self, SignRequest, TimestampRequest},
        error::AuthenticodeError,
        keys::{self, KeyMaterial},
        signing::{JavaPermissionLevel, SigningOptions},
    },
    serde::Deserialize,
    std::{collections::HashMap, path::Path},
};

/// One named key/certificate source a [SignEntry] can reference by name.
///
/// Exactly one of `pkcs12`, or the `spc`+(`key` or `pvk`) pair, must be set;
/// [CertProfile::load] rejects any other combination.
#[derive(Clone, Debug, Deserialize)]
pub struct CertProfile {
    pub pkcs12: Option<String>,
    pub spc: Option<String>,
    pub key: Option<String>,
    pub pvk: Option<String>,
    pub password: Option<String>,
}

impl CertProfile {
    fn load(&self) -> Result<KeyMaterial, AuthenticodeError> {
        match (&self.pkcs12, &self.spc, &self.key, &self.pvk) {
            (Some(pkcs12), None, None, None) => {
                let data = std::fs::read(pkcs12)?;
                keys::load_pkcs12(&data, self.password.as_deref().unwrap_or(""))
            }
            (None, Some(spc), Some(key), None) => {
                let spc_der = std::fs::read(spc)?;
                let key_data = std::fs::read(key)?;
                keys::load_spc_with_key(&spc_der, &key_data)
            }
            (None, Some(spc), None, Some(pvk)) => {
                let spc_der = std::fs::read(spc)?;
                let pvk_data = std::fs::read(pvk)?;
                keys::load_spc_with_pvk(&spc_der, &pvk_data, self.password.as_deref())
            }
            _ => Err(AuthenticodeError::ArgError(
                "cert profile must set exactly one of `pkcs12` or `spc` with one of `key`/`pvk`"
                    .into(),
            )),
        }
    }
}

/// One file to sign and the profile/options to sign it with.
#[derive(Clone, Debug, Deserialize)]
pub struct SignEntry {
    pub input: String,
    pub output: String,
    #[serde(default)]
    pub digest: Option<String>,
    pub cert_profile: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub java_permissions: Option<String>,
    #[serde(default)]
    pub commercial: bool,
    #[serde(default)]
    pub timestamp_url: Option<String>,
    #[serde(default)]
    pub rfc3161_url: Option<String>,
    #[serde(default)]
    pub timestamp_proxy: Option<String>,
}

/// The full `sign-spec` document: named profiles plus the entries to run
/// through them.
#[derive(Clone, Debug, Deserialize)]
pub struct SigningSpec {
    pub profiles: HashMap<String, CertProfile>,
    pub entries: Vec<SignEntry>,
}

impl SigningSpec {
    pub fn load(path: &Path) -> Result<Self, AuthenticodeError> {
        let text = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&text)
            .map_err(|e| AuthenticodeError::ArgError(format!("malformed sign-spec YAML: {}", e)))
    }
}

/// Parse and validate the per-entry signing knobs that don't require
/// touching disk, separated out so it can be checked entry-by-entry before
/// any (possibly slow) key loading happens.
fn entry_plan(
    entry: &SignEntry,
) -> Result<(DigestAlgorithm, SigningOptions, TimestampRequest), AuthenticodeError> {
    let digest_alg = match entry.digest.as_deref() {
        None => DigestAlgorithm::Sha256,
        Some("sha1") => DigestAlgorithm::Sha1,
        Some("sha256") => DigestAlgorithm::Sha256,
        Some(other) => {
            return Err(AuthenticodeError::ArgError(format!(
                "unsupported digest `{}` in sign-spec entry for {}",
                other, entry.input
            )))
        }
    };

    let java_level = entry
        .java_permissions
        .as_deref()
        .map(JavaPermissionLevel::from_cli_value)
        .transpose()?;

    let timestamp = match (&entry.timestamp_url, &entry.rfc3161_url) {
        (Some(url), None) => TimestampRequest::Authenticode {
            url: url.clone(),
            proxy: entry.timestamp_proxy.clone(),
        },
        (None, Some(url)) => TimestampRequest::Rfc3161 {
            url: url.clone(),
            proxy: entry.timestamp_proxy.clone(),
        },
        (None, None) => TimestampRequest::None,
        (Some(_), Some(_)) => {
            return Err(AuthenticodeError::ArgError(format!(
                "sign-spec entry for {} sets both timestamp_url and rfc3161_url",
                entry.input
            )))
        }
    };

    let options = SigningOptions {
        description: entry.description.clone(),
        url: entry.url.clone(),
        java_level,
        commercial: entry.commercial,
    };

    Ok((digest_alg, options, timestamp))
}

/// Sign every entry in `spec`, loading each referenced profile's key
/// material at most once, and return the number of files signed.
pub fn run(spec: &SigningSpec) -> Result<usize, AuthenticodeError> {
    for entry in &spec.entries {
        entry_plan(entry)?;
        if !spec.profiles.contains_key(entry.cert_profile.as_str()) {
            return Err(AuthenticodeError::ArgError(format!(
                "entry references unknown cert profile `{}`",
                entry.cert_profile
            )));
        }
    }

    let mut loaded: HashMap<&str, KeyMaterial> = HashMap::new();
    for entry in &spec.entries {
        if !loaded.contains_key(entry.cert_profile.as_str()) {
            let profile = &spec.profiles[&entry.cert_profile];
            loaded.insert(entry.cert_profile.as_str(), profile.load()?);
        }
    }

    for entry in &spec.entries {
        let (digest_alg, options, timestamp) = entry_plan(entry)?;
        let key_material = loaded.get(entry.cert_profile.as_str()).expect("loaded above");

        let request = SignRequest {
            digest_alg,
            key_material,
            options,
            timestamp,
        };

        let input = std::fs::read(&entry.input)?;
        let signed = engine::sign(&input, &request)?;
        std::fs::write(&entry.output, signed)?;
    }

    Ok(spec.entries.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_spec() {
        let yaml = indoc::indoc! {r#"
            profiles:
              default:
                pkcs12: cert.pfx
                password: hunter2
            entries:
              - input: a.exe
                output: a-signed.exe
                cert_profile: default
                digest: sha256
        "#};
        let spec: SigningSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.entries.len(), 1);
        assert_eq!(spec.entries[0].cert_profile, "default");
        assert!(spec.profiles.contains_key("default"));
    }

    #[test]
    fn rejects_entry_with_both_timestamp_kinds() {
        let entry = SignEntry {
            input: "a.exe".into(),
            output: "b.exe".into(),
            digest: None,
            cert_profile: "default".into(),
            description: None,
            url: None,
            java_permissions: None,
            commercial: false,
            timestamp_url: Some("http://example.com".into()),
            rfc3161_url: Some("http://example.com".into()),
            timestamp_proxy: None,
        };
        let err = entry_plan(&entry).unwrap_err();
        assert!(matches!(err, AuthenticodeError::ArgError(_)));
    }

    #[test]
    fn rejects_unknown_cert_profile() {
        let spec = SigningSpec {
            profiles: HashMap::new(),
            entries: vec![SignEntry {
                input: "a.exe".into(),
                output: "b.exe".into(),
                digest: None,
                cert_profile: "missing".into(),
                description: None,
                url: None,
                java_permissions: None,
                commercial: false,
                timestamp_url: None,
                rfc3161_url: None,
                timestamp_proxy: None,
            }],
        };
        let err = run(&spec).unwrap_err();
        assert!(matches!(err, AuthenticodeError::ArgError(_)));
    }
}
