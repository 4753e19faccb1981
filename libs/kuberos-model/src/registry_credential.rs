//! Registry credential entity (spec §3, §6). Token is write-once; the
//! encoded Docker-config JSON is regenerated on each materialisation rather
//! than persisted, so a leaked ConfigMap dump never contains the raw token
//! twice — grounded on `main/utils/secret_utils.py`.

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use serde_json::json;

#[derive(Debug, Clone)]
pub struct RegistryCredential {
    pub name: String,
    pub user: String,
    pub registry_url: String,
    token: String,
}

impl RegistryCredential {
    pub fn new(name: impl Into<String>, user: impl Into<String>, registry_url: impl Into<String>, token: impl Into<String>) -> Self {
        RegistryCredential {
            name: name.into(),
            user: user.into(),
            registry_url: registry_url.into(),
            token: token.into(),
        }
    }

    /// Encodes `{"auths":{"<registry_url>":{"auth":"<base64(user:token)>"}}}`
    /// then base64-encodes the whole object, matching the `.dockerconfigjson`
    /// layout from spec §6.
    pub fn to_docker_config_json(&self) -> String {
        let auth = B64.encode(format!("{}:{}", self.user, self.token));
        let doc = json!({
            "auths": {
                self.registry_url.clone(): { "auth": auth }
            }
        });
        B64.encode(doc.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;

    #[test]
    fn derives_expected_docker_config() {
        let cred = RegistryCredential::new("cred", "u", "r.example:5050", "t");
        let encoded = cred.to_docker_config_json();
        let decoded = B64.decode(encoded).unwrap();
        let doc: serde_json::Value = serde_json::from_slice(&decoded).unwrap();
        let auth = doc["auths"]["r.example:5050"]["auth"].as_str().unwrap();
        assert_eq!(auth, base64::engine::general_purpose::STANDARD.encode("u:t"));
    }
}
