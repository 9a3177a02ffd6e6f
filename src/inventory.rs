//! Configuration file inventory (`config_files.json`).
//!
//! Every config-kind file found by the scanner is listed with its MIME
//! type, a content hash and the key paths it defines, so a reviewer can
//! check the `control-configuration` references a model produced against
//! keys that actually exist.
//!
//! Key paths are dotted (`server.tls.enabled`); list elements that contain
//! further structure appear as `prefix[i]`. INI-style files produce
//! `[section]` and `[section].option`, properties files their bare keys.
//! A file that fails to parse gets an empty key list.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use control_mapper_core::segment::extension;

use crate::scan::ScannedFile;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigFileEntry {
    pub file_path: String,
    pub selection_reason: String,
    pub mime: String,
    /// `sha256:<hex>`
    pub hash: String,
    pub keys: Vec<String>,
}

/// Build an inventory entry for one config file.
pub fn inventory_entry(file: &ScannedFile) -> ConfigFileEntry {
    let ext = extension(&file.relative_path).unwrap_or_default();
    let keys = extract_keys(&ext, &file.content).unwrap_or_else(|| {
        debug!(path = %file.relative_path, "could not extract config keys");
        Vec::new()
    });

    ConfigFileEntry {
        file_path: file.relative_path.clone(),
        selection_reason: "extension".to_string(),
        mime: mime_for(&ext).to_string(),
        hash: format!("sha256:{:x}", Sha256::digest(file.content.as_bytes())),
        keys,
    }
}

pub fn mime_for(ext: &str) -> &'static str {
    match ext {
        "yaml" | "yml" => "text/x-yaml",
        "json" => "application/json",
        "toml" => "text/x-toml",
        "ini" => "text/x-ini",
        "properties" => "text/x-properties",
        _ => "text/plain",
    }
}

/// Key paths for a file with extension `ext`. `None` on parse failure.
pub fn extract_keys(ext: &str, content: &str) -> Option<Vec<String>> {
    let tree = match ext {
        "json" => Node::from(serde_json::from_str::<serde_json::Value>(content).ok()?),
        "toml" => Node::from(toml::from_str::<toml::Value>(content).ok()?),
        "yaml" | "yml" => {
            if content.trim().is_empty() {
                return Some(Vec::new());
            }
            Node::from(serde_yaml::from_str::<serde_yaml::Value>(content).ok()?)
        }
        "ini" | "conf" => return Some(ini_keys(content)),
        "properties" => return Some(properties_keys(content)),
        _ => return None,
    };
    let mut keys = Vec::new();
    tree.collect_keys("", &mut keys);
    Some(keys)
}

/// Format-neutral view of a parsed document.
enum Node {
    Map(Vec<(String, Node)>),
    List(Vec<Node>),
    Leaf,
}

impl Node {
    fn collect_keys(&self, prefix: &str, out: &mut Vec<String>) {
        match self {
            Node::Map(entries) => {
                for (key, value) in entries {
                    let path = if prefix.is_empty() {
                        key.clone()
                    } else {
                        format!("{}.{}", prefix, key)
                    };
                    out.push(path.clone());
                    value.collect_keys(&path, out);
                }
            }
            Node::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    if !matches!(item, Node::Leaf) {
                        item.collect_keys(&format!("{}[{}]", prefix, i), out);
                    }
                }
            }
            Node::Leaf => {}
        }
    }
}

impl From<serde_json::Value> for Node {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Object(map) => {
                Node::Map(map.into_iter().map(|(k, v)| (k, Node::from(v))).collect())
            }
            serde_json::Value::Array(items) => Node::List(items.into_iter().map(Node::from).collect()),
            _ => Node::Leaf,
        }
    }
}

impl From<toml::Value> for Node {
    fn from(value: toml::Value) -> Self {
        match value {
            toml::Value::Table(table) => {
                Node::Map(table.into_iter().map(|(k, v)| (k, Node::from(v))).collect())
            }
            toml::Value::Array(items) => Node::List(items.into_iter().map(Node::from).collect()),
            _ => Node::Leaf,
        }
    }
}

impl From<serde_yaml::Value> for Node {
    fn from(value: serde_yaml::Value) -> Self {
        match value {
            serde_yaml::Value::Mapping(map) => Node::Map(
                map.into_iter()
                    .map(|(k, v)| (yaml_key(&k), Node::from(v)))
                    .collect(),
            ),
            serde_yaml::Value::Sequence(items) => {
                Node::List(items.into_iter().map(Node::from).collect())
            }
            serde_yaml::Value::Tagged(tagged) => Node::from(tagged.value),
            _ => Node::Leaf,
        }
    }
}

fn yaml_key(key: &serde_yaml::Value) -> String {
    match key {
        serde_yaml::Value::String(s) => s.clone(),
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::Null => "null".to_string(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim().to_string())
            .unwrap_or_default(),
    }
}

fn ini_keys(content: &str) -> Vec<String> {
    let mut keys = Vec::new();
    let mut section: Option<String> = None;

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if line.starts_with('[') && line.ends_with(']') {
            let name = line[1..line.len() - 1].trim().to_string();
            keys.push(format!("[{}]", name));
            section = Some(name);
            continue;
        }
        let Some(split) = line.find(['=', ':']) else {
            continue;
        };
        let option = line[..split].trim().to_lowercase();
        if option.is_empty() {
            continue;
        }
        match &section {
            Some(s) => keys.push(format!("[{}].{}", s, option)),
            None => keys.push(option),
        }
    }
    keys
}

fn properties_keys(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#') && !l.starts_with('!'))
        .filter_map(|l| l.split_once('=').map(|(k, _)| k.trim().to_string()))
        .filter(|k| !k.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use control_mapper_core::models::UnitKind;

    #[test]
    fn test_json_keys() {
        let keys = extract_keys(
            "json",
            r#"{"server": {"tls": {"enabled": true}, "ports": [80, {"name": "https"}]}}"#,
        )
        .unwrap();
        assert_eq!(
            keys,
            vec![
                "server",
                "server.ports",
                "server.ports[1].name",
                "server.tls",
                "server.tls.enabled"
            ]
        );
    }

    #[test]
    fn test_toml_keys() {
        let keys = extract_keys("toml", "[auth]\njwt_ttl = 300\n[[users]]\nname = \"a\"\n").unwrap();
        assert!(keys.contains(&"auth.jwt_ttl".to_string()));
        assert!(keys.contains(&"users[0].name".to_string()));
    }

    #[test]
    fn test_yaml_keys() {
        let keys = extract_keys(
            "yaml",
            "tls:\n  enabled: true\n  ciphers:\n    - a\n    - b\nlisteners:\n  - port: 443\n",
        )
        .unwrap();
        assert_eq!(
            keys,
            vec!["tls", "tls.enabled", "tls.ciphers", "listeners", "listeners[0].port"]
        );
        assert_eq!(extract_keys("yml", "").unwrap(), Vec::<String>::new());
    }

    #[test]
    fn test_ini_and_properties_keys() {
        let ini = "; comment\n[Server]\nPort = 8080\nssl: on\n";
        assert_eq!(
            extract_keys("ini", ini).unwrap(),
            vec!["[Server]", "[Server].port", "[Server].ssl"]
        );
        let props = "# c\n! c\nauth.enabled=true\n\nsession.timeout = 30\n";
        assert_eq!(
            extract_keys("properties", props).unwrap(),
            vec!["auth.enabled", "session.timeout"]
        );
    }

    #[test]
    fn test_parse_failure_yields_empty_keys() {
        assert!(extract_keys("json", "{not json").is_none());
        let entry = inventory_entry(&ScannedFile {
            relative_path: "broken.json".to_string(),
            kind: UnitKind::Config,
            content: "{not json".to_string(),
        });
        assert!(entry.keys.is_empty());
        assert_eq!(entry.mime, "application/json");
        assert!(entry.hash.starts_with("sha256:"));
        assert_eq!(entry.hash.len(), "sha256:".len() + 64);
    }
}
