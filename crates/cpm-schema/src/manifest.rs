//! The `cpm_package.spec` manifest.
//!
//! The on-disk form is a JSON object with `camelCase` keys. Dependency tables
//! are kept in document order, and duplicate names are detected rather than
//! silently collapsed the way a plain map would. Fields the manifest does not
//! model are carried through untouched in [`Manifest::extra`].

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

use crate::{Constraint, PackageName, SchemaError, Version};

/// Which table a dependency was declared in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DependencyKind {
    /// `dependencies`
    Runtime,
    /// `devDependencies`
    Dev,
    /// `optionalDependencies`
    Optional,
}

/// One dependency entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    /// Package name.
    pub name: PackageName,
    /// Acceptable versions.
    pub constraint: Constraint,
    /// Declaring table.
    pub kind: DependencyKind,
}

impl Dependency {
    /// A runtime dependency.
    pub fn new(name: PackageName, constraint: Constraint) -> Self {
        Self {
            name,
            constraint,
            kind: DependencyKind::Runtime,
        }
    }

    /// Same entry, declared in a different table.
    #[must_use]
    pub fn with_kind(mut self, kind: DependencyKind) -> Self {
        self.kind = kind;
        self
    }

    /// Declared under `devDependencies`.
    pub fn is_dev(&self) -> bool {
        self.kind == DependencyKind::Dev
    }

    /// Declared under `optionalDependencies`.
    pub fn is_optional(&self) -> bool {
        self.kind == DependencyKind::Optional
    }
}

/// Native build settings (`buildConfig`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildConfig {
    /// e.g. `make`, `cmake`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_system: Option<String>,
    /// Header search paths, relative to the package root.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include_dirs: Vec<String>,
    /// Library search paths, relative to the package root.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub library_dirs: Vec<String>,
    /// Libraries to link, without the `lib` prefix.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub libraries: Vec<String>,
}

/// A validated package manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawManifest", into = "RawManifest")]
pub struct Manifest {
    /// Package name.
    pub name: PackageName,
    /// Package version.
    pub version: Version,
    /// One-line summary.
    pub description: Option<String>,
    /// Author.
    pub author: Option<String>,
    /// SPDX license expression.
    pub license: Option<String>,
    /// Project homepage URL.
    pub homepage: Option<String>,
    /// Source repository URL.
    pub repository: Option<String>,
    /// All dependency entries in declaration order: runtime, then dev, then optional.
    pub dependencies: Vec<Dependency>,
    /// Script name to shell command.
    pub scripts: BTreeMap<String, String>,
    /// Native build settings.
    pub build_config: Option<BuildConfig>,
    /// Unrecognised top-level fields, preserved on write.
    pub extra: Map<String, Value>,
}

impl Manifest {
    /// A manifest with no dependencies or metadata.
    pub fn new(name: PackageName, version: Version) -> Self {
        Self {
            name,
            version,
            description: None,
            author: None,
            license: None,
            homepage: None,
            repository: None,
            dependencies: Vec::new(),
            scripts: BTreeMap::new(),
            build_config: None,
            extra: Map::new(),
        }
    }

    /// Parse and validate a manifest document.
    ///
    /// # Errors
    ///
    /// [`SchemaError::Malformed`] if the text is not a JSON object of the
    /// expected shape; a parse or validation error if a field is invalid.
    pub fn from_json(text: &str) -> Result<Self, SchemaError> {
        let raw: RawManifest =
            serde_json::from_str(text).map_err(|e| SchemaError::Malformed(e.to_string()))?;
        Self::try_from(raw)
    }

    /// Serialize as pretty-printed JSON with a trailing newline.
    pub fn to_json_pretty(&self) -> String {
        let raw = RawManifest::from(self.clone());
        // RawManifest holds only strings, maps and JSON values.
        let mut out = serde_json::to_string_pretty(&raw).unwrap_or_default();
        out.push('\n');
        out
    }

    /// Dependencies declared in one table.
    pub fn dependencies_of(&self, kind: DependencyKind) -> impl Iterator<Item = &Dependency> {
        self.dependencies.iter().filter(move |d| d.kind == kind)
    }

    /// Look up a dependency by name in any table.
    pub fn dependency(&self, name: &str) -> Option<&Dependency> {
        self.dependencies.iter().find(|d| d.name == name)
    }

    /// Add a dependency, replacing any existing entry with the same name.
    ///
    /// Returns the entry that was replaced.
    pub fn upsert_dependency(&mut self, dep: Dependency) -> Option<Dependency> {
        if let Some(slot) = self.dependencies.iter_mut().find(|d| d.name == dep.name) {
            return Some(std::mem::replace(slot, dep));
        }
        self.dependencies.push(dep);
        None
    }

    /// Shell command for a script.
    pub fn script(&self, name: &str) -> Option<&str> {
        self.scripts.get(name).map(String::as_str)
    }

    /// Re-check the invariants that deserialization enforces.
    ///
    /// # Errors
    ///
    /// [`SchemaError::Validation`] if a dependency name appears twice.
    pub fn validate(&self) -> Result<(), SchemaError> {
        let mut seen = HashSet::new();
        for dep in &self.dependencies {
            if !seen.insert(dep.name.as_str()) {
                return Err(SchemaError::Validation(format!(
                    "duplicate dependency '{}'",
                    dep.name
                )));
            }
        }
        Ok(())
    }
}

/// A dependency table in document order, duplicates included.
#[derive(Debug, Default)]
struct DepTable(Vec<(String, String)>);

impl DepTable {
    fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for DepTable {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, constraint) in &self.0 {
            map.serialize_entry(name, constraint)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for DepTable {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct TableVisitor;

        impl<'de> Visitor<'de> for TableVisitor {
            type Value = DepTable;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an object of package name to constraint string")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<DepTable, A::Error> {
                let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((name, constraint)) = access.next_entry::<String, String>()? {
                    entries.push((name, constraint));
                }
                Ok(DepTable(entries))
            }
        }

        deserializer.deserialize_map(TableVisitor)
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawManifest {
    name: String,
    version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    license: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    homepage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    repository: Option<String>,
    #[serde(default, skip_serializing_if = "DepTable::is_empty")]
    dependencies: DepTable,
    #[serde(default, skip_serializing_if = "DepTable::is_empty")]
    dev_dependencies: DepTable,
    #[serde(default, skip_serializing_if = "DepTable::is_empty")]
    optional_dependencies: DepTable,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    scripts: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    build_config: Option<BuildConfig>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl TryFrom<RawManifest> for Manifest {
    type Error = SchemaError;

    fn try_from(raw: RawManifest) -> Result<Self, Self::Error> {
        let name = PackageName::parse(&raw.name)?;
        let version = Version::parse(&raw.version)?;

        let tables = [
            (raw.dependencies, DependencyKind::Runtime),
            (raw.dev_dependencies, DependencyKind::Dev),
            (raw.optional_dependencies, DependencyKind::Optional),
        ];

        let mut dependencies = Vec::new();
        for (table, kind) in tables {
            for (dep_name, constraint) in table.0 {
                dependencies.push(Dependency {
                    name: PackageName::parse(&dep_name)?,
                    constraint: Constraint::parse(&constraint)?,
                    kind,
                });
            }
        }

        let manifest = Manifest {
            name,
            version,
            description: raw.description,
            author: raw.author,
            license: raw.license,
            homepage: raw.homepage,
            repository: raw.repository,
            dependencies,
            scripts: raw.scripts,
            build_config: raw.build_config,
            extra: raw.extra,
        };
        manifest.validate()?;
        Ok(manifest)
    }
}

impl From<Manifest> for RawManifest {
    fn from(m: Manifest) -> Self {
        let mut tables = [DepTable::default(), DepTable::default(), DepTable::default()];
        for dep in m.dependencies {
            let slot = match dep.kind {
                DependencyKind::Runtime => 0,
                DependencyKind::Dev => 1,
                DependencyKind::Optional => 2,
            };
            tables[slot].0.push((dep.name.into(), dep.constraint.to_string()));
        }
        let [dependencies, dev_dependencies, optional_dependencies] = tables;

        RawManifest {
            name: m.name.into(),
            version: m.version.into(),
            description: m.description,
            author: m.author,
            license: m.license,
            homepage: m.homepage,
            repository: m.repository,
            dependencies,
            dev_dependencies,
            optional_dependencies,
            scripts: m.scripts,
            build_config: m.build_config,
            extra: m.extra,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "name": "mathlib",
        "version": "1.4.0",
        "description": "Small numeric helpers",
        "license": "MIT",
        "dependencies": { "zlib": "^1.2.0", "libpng": "~1.6.0" },
        "devDependencies": { "unity": "*" },
        "scripts": { "build": "make", "test": "make test" },
        "buildConfig": { "buildSystem": "make", "includeDirs": ["include"], "libraries": ["m"] },
        "keywords": ["math", "c"]
    }"#;

    #[test]
    fn test_parse_full_manifest() {
        let m = Manifest::from_json(SAMPLE).unwrap();
        assert_eq!(m.name, "mathlib");
        assert_eq!(m.version, Version::new(1, 4, 0));
        assert_eq!(m.license.as_deref(), Some("MIT"));

        let names: Vec<_> = m.dependencies.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, ["zlib", "libpng", "unity"]);
        assert!(m.dependency("unity").unwrap().is_dev());
        assert_eq!(m.dependencies_of(DependencyKind::Runtime).count(), 2);

        assert_eq!(m.script("test"), Some("make test"));
        let build = m.build_config.as_ref().unwrap();
        assert_eq!(build.build_system.as_deref(), Some("make"));
        assert_eq!(build.include_dirs, ["include"]);
    }

    #[test]
    fn test_unknown_fields_survive_round_trip() {
        let m = Manifest::from_json(SAMPLE).unwrap();
        assert!(m.extra.contains_key("keywords"));

        let again = Manifest::from_json(&m.to_json_pretty()).unwrap();
        assert_eq!(again, m);
        assert!(again.to_json_pretty().contains("\"keywords\""));
    }

    #[test]
    fn test_duplicate_dependency_is_rejected() {
        let text = r#"{ "name": "a", "version": "1.0.0",
                        "dependencies": { "zlib": "^1.0.0", "zlib": "^2.0.0" } }"#;
        let err = Manifest::from_json(text).unwrap_err();
        assert!(matches!(err, SchemaError::Validation(_)), "{err}");
    }

    #[test]
    fn test_duplicate_across_tables_is_rejected() {
        let text = r#"{ "name": "a", "version": "1.0.0",
                        "dependencies": { "zlib": "^1.0.0" },
                        "devDependencies": { "ZLIB": "*" } }"#;
        assert!(matches!(
            Manifest::from_json(text),
            Err(SchemaError::Validation(_))
        ));
    }

    #[test]
    fn test_invalid_fields() {
        assert!(matches!(
            Manifest::from_json(r#"{ "name": "", "version": "1.0.0" }"#),
            Err(SchemaError::InvalidName(_))
        ));
        assert!(matches!(
            Manifest::from_json(r#"{ "name": "a", "version": "1.0" }"#),
            Err(SchemaError::InvalidVersion { .. })
        ));
        assert!(matches!(
            Manifest::from_json(r#"{ "name": "a", "version": "1.0.0", "dependencies": { "b": "^x" } }"#),
            Err(SchemaError::InvalidConstraint { .. })
        ));
        assert!(matches!(
            Manifest::from_json(r#"{ "version": "1.0.0" }"#),
            Err(SchemaError::Malformed(_))
        ));
        assert!(matches!(
            Manifest::from_json("[]"),
            Err(SchemaError::Malformed(_))
        ));
    }

    #[test]
    fn test_upsert_replaces_in_place() {
        let mut m = Manifest::from_json(SAMPLE).unwrap();
        let previous = m.upsert_dependency(Dependency::new(
            PackageName::new("zlib"),
            Constraint::parse("^1.3.0").unwrap(),
        ));
        assert!(previous.is_some());
        assert_eq!(m.dependencies[0].constraint.to_string(), "^1.3.0");

        m.upsert_dependency(Dependency::new(PackageName::new("cjson"), Constraint::Any));
        assert_eq!(m.dependencies.last().unwrap().name, "cjson");
        m.validate().unwrap();
    }

    #[test]
    fn test_deserialize_through_serde() {
        let m: Manifest = serde_json::from_str(SAMPLE).unwrap();
        assert_eq!(m.name, "mathlib");
        let bad: Result<Manifest, _> =
            serde_json::from_str(r#"{ "name": "a", "version": "nope" }"#);
        assert!(bad.is_err());
    }
}
