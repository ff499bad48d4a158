//! Versioned cache generations.
//!
//! A generation name is `<prefix>-<version>`. Bumping the version token is the
//! only way to invalidate a generation: on activation, every cache in the
//! same family (same prefix) with a different version is purged.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Generation {
  pub prefix: String,
  pub version: String,
}

impl Generation {
  pub fn new(prefix: impl Into<String>, version: impl Into<String>) -> Self {
    Self {
      prefix: prefix.into(),
      version: version.into(),
    }
  }

  pub fn name(&self) -> String {
    format!("{}-{}", self.prefix, self.version)
  }

  /// Whether `cache_name` belongs to this generation's family, any version.
  pub fn is_family(&self, cache_name: &str) -> bool {
    cache_name
      .strip_prefix(&self.prefix)
      .and_then(|rest| rest.strip_prefix('-'))
      .is_some_and(|version| !version.is_empty())
  }
}

/// Everything a worker version owns: its two generations and the manifest it
/// installs. Persisted as JSON to remember the active and waiting versions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
  pub static_assets: Generation,
  pub remote_data: Generation,
  /// Root-relative paths of critical assets
  pub manifest: Vec<String>,
}

impl Release {
  pub fn static_cache(&self) -> String {
    self.static_assets.name()
  }

  pub fn data_cache(&self) -> String {
    self.remote_data.name()
  }

  /// Whether both releases name the same two generations. Only a version
  /// change makes a new release; manifest edits alone do not.
  pub fn same_generations(&self, other: &Release) -> bool {
    self.static_assets == other.static_assets && self.remote_data == other.remote_data
  }

  /// Cache names left behind by other versions of this release's families.
  pub fn stale_caches<'a>(&self, names: &'a [String]) -> Vec<&'a String> {
    let current = [self.static_cache(), self.data_cache()];
    names
      .iter()
      .filter(|name| !current.contains(*name))
      .filter(|name| {
        self.static_assets.is_family(name.as_str()) || self.remote_data.is_family(name.as_str())
      })
      .collect()
  }

  /// Short label for logs and prompts.
  pub fn label(&self) -> String {
    format!("{} + {}", self.static_cache(), self.data_cache())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn release(static_version: &str, data_version: &str) -> Release {
    Release {
      static_assets: Generation::new("songbook-poc-cache", static_version),
      remote_data: Generation::new("song-data-cache", data_version),
      manifest: vec!["/".to_string()],
    }
  }

  #[test]
  fn test_generation_name_embeds_version() {
    assert_eq!(
      Generation::new("songbook-poc-cache", "v1").name(),
      "songbook-poc-cache-v1"
    );
  }

  #[test]
  fn test_family_membership() {
    let generation = Generation::new("song-data-cache", "v2");
    assert!(generation.is_family("song-data-cache-v1"));
    assert!(generation.is_family("song-data-cache-v2"));
    assert!(!generation.is_family("song-data-cache-"));
    assert!(!generation.is_family("song-data-cachev1"));
    assert!(!generation.is_family("songbook-poc-cache-v1"));
  }

  #[test]
  fn test_stale_caches_excludes_current_and_foreign_names() {
    let names: Vec<String> = [
      "songbook-poc-cache-v1",
      "songbook-poc-cache-v2",
      "song-data-cache-v1",
      "unrelated-cache",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    let stale = release("v2", "v1").stale_caches(&names);
    assert_eq!(stale, vec![&names[0]]);
  }

  #[test]
  fn test_manifest_edit_keeps_generations() {
    let mut edited = release("v1", "v1");
    edited.manifest.push("/new.js".to_string());

    assert!(release("v1", "v1").same_generations(&edited));
    assert!(!release("v1", "v1").same_generations(&release("v1", "v2")));
    assert!(!release("v1", "v1").same_generations(&release("v2", "v1")));
  }

  #[test]
  fn test_stale_caches_empty_when_nothing_to_purge() {
    let names = vec![
      "songbook-poc-cache-v1".to_string(),
      "song-data-cache-v1".to_string(),
    ];
    assert!(release("v1", "v1").stale_caches(&names).is_empty());
  }
}
