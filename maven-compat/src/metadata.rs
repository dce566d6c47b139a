//! The `maven-metadata.xml` document.
//!
//! Three levels of metadata share the same file name: group level (plugin
//! prefix mappings), artifact level (the version list) and snapshot version
//! level (the current timestamp/build number plus per-file snapshot
//! versions). One model covers all three; absent sections stay `None`/empty.
//!
//! Parsing is strict about structure (mismatched or malformed tags are
//! rejected, duplicate elements are rejected) but skips unknown element
//! names, since the deployed format has grown fields over time. `Display`
//! is the serializer; its output parses back to an equal value, but is not
//! byte-identical to arbitrary input, which is why callers that care about
//! checksums must keep the original bytes around.

use std::fmt::{self, Display};

use crate::xml::{self, Cursor, Event};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    #[error(transparent)]
    Xml(#[from] xml::Error),

    #[error("duplicate element <{0}>")]
    DuplicateElement(&'static str),

    #[error("invalid <{element}> value: {value:?}")]
    InvalidValue {
        element: &'static str,
        value: String,
    },

    #[error("trailing content after </metadata>")]
    TrailingContent,
}

/// A parsed `maven-metadata.xml`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    pub group_id: Option<String>,
    pub artifact_id: Option<String>,
    /// Version-level metadata carries the base version here.
    pub version: Option<String>,
    pub versioning: Option<Versioning>,
    /// Group-level plugin prefix mappings.
    pub plugins: Vec<Plugin>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Versioning {
    pub latest: Option<String>,
    pub release: Option<String>,
    pub versions: Vec<String>,
    /// `yyyyMMddHHmmss`; compares correctly as a string.
    pub last_updated: Option<String>,
    pub snapshot: Option<Snapshot>,
    pub snapshot_versions: Vec<SnapshotVersion>,
}

/// The `<snapshot>` block of snapshot version metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    /// `yyyyMMdd.HHmmss` of the newest deployment.
    pub timestamp: Option<String>,
    pub build_number: u32,
    pub local_copy: bool,
}

/// One `<snapshotVersion>` entry (metadata model 1.1).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotVersion {
    pub classifier: Option<String>,
    pub extension: String,
    /// The unique snapshot version this file carries.
    pub value: String,
    pub updated: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plugin {
    pub name: Option<String>,
    pub prefix: String,
    pub artifact_id: String,
}

impl Metadata {
    pub fn parse(input: &str) -> Result<Self, Error> {
        let mut cur = Cursor::new(input);
        cur.expect_open("metadata")?;

        let mut metadata = Metadata::default();
        loop {
            match cur.next_event()?.ok_or(xml::Error::UnexpectedEof)? {
                Event::Open("groupId") => {
                    set_once(&mut metadata.group_id, cur.text_close("groupId")?, "groupId")?
                }
                Event::Open("artifactId") => set_once(
                    &mut metadata.artifact_id,
                    cur.text_close("artifactId")?,
                    "artifactId",
                )?,
                Event::Open("version") => {
                    set_once(&mut metadata.version, cur.text_close("version")?, "version")?
                }
                Event::Open("versioning") => {
                    if metadata.versioning.is_some() {
                        return Err(Error::DuplicateElement("versioning"));
                    }
                    metadata.versioning = Some(parse_versioning(&mut cur)?);
                }
                Event::Open("plugins") => parse_plugins(&mut cur, &mut metadata.plugins)?,
                Event::Open(other) => cur.skip_element(other)?,
                Event::Close("metadata") => break,
                ev => {
                    return Err(xml::Error::UnexpectedEvent {
                        expected: "element inside <metadata>".to_string(),
                        found: format!("{:?}", ev),
                    }
                    .into())
                }
            }
        }

        if cur.next_event()?.is_some() {
            return Err(Error::TrailingContent);
        }
        Ok(metadata)
    }

    /// Merges another document into this one, Maven style: versions are
    /// unioned, and if the other side is newer by `lastUpdated` its
    /// latest/release/snapshot state replaces ours. Plugin mappings are
    /// unioned by prefix. Returns whether anything changed.
    pub fn merge(&mut self, other: &Metadata) -> bool {
        let mut changed = false;

        for plugin in &other.plugins {
            if !self.plugins.iter().any(|p| p.prefix == plugin.prefix) {
                self.plugins.push(plugin.clone());
                changed = true;
            }
        }

        if let Some(other_v) = &other.versioning {
            let v = match &mut self.versioning {
                Some(v) => v,
                None => {
                    changed = true;
                    self.versioning.insert(Versioning::default())
                }
            };

            for version in &other_v.versions {
                if !v.versions.contains(version) {
                    v.versions.push(version.clone());
                    changed = true;
                }
            }

            for sv in &other_v.snapshot_versions {
                match v
                    .snapshot_versions
                    .iter_mut()
                    .find(|mine| mine.classifier == sv.classifier && mine.extension == sv.extension)
                {
                    Some(mine) => {
                        if sv.updated > mine.updated {
                            *mine = sv.clone();
                            changed = true;
                        }
                    }
                    None => {
                        v.snapshot_versions.push(sv.clone());
                        changed = true;
                    }
                }
            }

            // The side with the greater lastUpdated wins the header fields.
            if other_v.last_updated > v.last_updated {
                v.last_updated = other_v.last_updated.clone();
                changed = true;
                if other_v.release.is_some() {
                    v.release = other_v.release.clone();
                }
                if other_v.latest.is_some() {
                    v.latest = other_v.latest.clone();
                }
                if let Some(s) = &other_v.snapshot {
                    v.snapshot = Some(s.clone());
                }
            }
        }

        changed
    }
}

fn set_once(
    slot: &mut Option<String>,
    value: String,
    element: &'static str,
) -> Result<(), Error> {
    if slot.is_some() {
        return Err(Error::DuplicateElement(element));
    }
    *slot = Some(value);
    Ok(())
}

fn parse_versioning(cur: &mut Cursor) -> Result<Versioning, Error> {
    let mut v = Versioning::default();
    loop {
        match cur.next_event()?.ok_or(xml::Error::UnexpectedEof)? {
            Event::Open("latest") => set_once(&mut v.latest, cur.text_close("latest")?, "latest")?,
            Event::Open("release") => {
                set_once(&mut v.release, cur.text_close("release")?, "release")?
            }
            Event::Open("lastUpdated") => set_once(
                &mut v.last_updated,
                cur.text_close("lastUpdated")?,
                "lastUpdated",
            )?,
            Event::Open("versions") => parse_versions(cur, &mut v.versions)?,
            Event::Open("snapshot") => {
                if v.snapshot.is_some() {
                    return Err(Error::DuplicateElement("snapshot"));
                }
                v.snapshot = Some(parse_snapshot(cur)?);
            }
            Event::Open("snapshotVersions") => {
                parse_snapshot_versions(cur, &mut v.snapshot_versions)?
            }
            Event::Open(other) => cur.skip_element(other)?,
            Event::Close("versioning") => return Ok(v),
            ev => {
                return Err(xml::Error::UnexpectedEvent {
                    expected: "element inside <versioning>".to_string(),
                    found: format!("{:?}", ev),
                }
                .into())
            }
        }
    }
}

fn parse_versions(cur: &mut Cursor, out: &mut Vec<String>) -> Result<(), Error> {
    loop {
        match cur.next_event()?.ok_or(xml::Error::UnexpectedEof)? {
            Event::Open("version") => out.push(cur.text_close("version")?),
            Event::Open(other) => cur.skip_element(other)?,
            Event::Close("versions") => return Ok(()),
            ev => {
                return Err(xml::Error::UnexpectedEvent {
                    expected: "<version>".to_string(),
                    found: format!("{:?}", ev),
                }
                .into())
            }
        }
    }
}

fn parse_snapshot(cur: &mut Cursor) -> Result<Snapshot, Error> {
    let mut s = Snapshot::default();
    loop {
        match cur.next_event()?.ok_or(xml::Error::UnexpectedEof)? {
            Event::Open("timestamp") => {
                set_once(&mut s.timestamp, cur.text_close("timestamp")?, "timestamp")?
            }
            Event::Open("buildNumber") => {
                let text = cur.text_close("buildNumber")?;
                s.build_number = text.parse().map_err(|_| Error::InvalidValue {
                    element: "buildNumber",
                    value: text,
                })?;
            }
            Event::Open("localCopy") => {
                let text = cur.text_close("localCopy")?;
                s.local_copy = match text.as_str() {
                    "true" => true,
                    "false" => false,
                    _ => {
                        return Err(Error::InvalidValue {
                            element: "localCopy",
                            value: text,
                        })
                    }
                };
            }
            Event::Open(other) => cur.skip_element(other)?,
            Event::Close("snapshot") => return Ok(s),
            ev => {
                return Err(xml::Error::UnexpectedEvent {
                    expected: "element inside <snapshot>".to_string(),
                    found: format!("{:?}", ev),
                }
                .into())
            }
        }
    }
}

fn parse_plugins(cur: &mut Cursor, out: &mut Vec<Plugin>) -> Result<(), Error> {
    loop {
        match cur.next_event()?.ok_or(xml::Error::UnexpectedEof)? {
            Event::Open("plugin") => {
                let mut p = Plugin::default();
                loop {
                    match cur.next_event()?.ok_or(xml::Error::UnexpectedEof)? {
                        Event::Open("name") => p.name = Some(cur.text_close("name")?),
                        Event::Open("prefix") => p.prefix = cur.text_close("prefix")?,
                        Event::Open("artifactId") => p.artifact_id = cur.text_close("artifactId")?,
                        Event::Open(other) => cur.skip_element(other)?,
                        Event::Close("plugin") => break,
                        ev => {
                            return Err(xml::Error::UnexpectedEvent {
                                expected: "element inside <plugin>".to_string(),
                                found: format!("{:?}", ev),
                            }
                            .into())
                        }
                    }
                }
                out.push(p);
            }
            Event::Open(other) => cur.skip_element(other)?,
            Event::Close("plugins") => return Ok(()),
            ev => {
                return Err(xml::Error::UnexpectedEvent {
                    expected: "<plugin>".to_string(),
                    found: format!("{:?}", ev),
                }
                .into())
            }
        }
    }
}

fn parse_snapshot_versions(cur: &mut Cursor, out: &mut Vec<SnapshotVersion>) -> Result<(), Error> {
    loop {
        match cur.next_event()?.ok_or(xml::Error::UnexpectedEof)? {
            Event::Open("snapshotVersion") => {
                let mut sv = SnapshotVersion::default();
                loop {
                    match cur.next_event()?.ok_or(xml::Error::UnexpectedEof)? {
                        Event::Open("classifier") => {
                            sv.classifier = Some(cur.text_close("classifier")?)
                        }
                        Event::Open("extension") => sv.extension = cur.text_close("extension")?,
                        Event::Open("value") => sv.value = cur.text_close("value")?,
                        Event::Open("updated") => sv.updated = Some(cur.text_close("updated")?),
                        Event::Open(other) => cur.skip_element(other)?,
                        Event::Close("snapshotVersion") => break,
                        ev => {
                            return Err(xml::Error::UnexpectedEvent {
                                expected: "element inside <snapshotVersion>".to_string(),
                                found: format!("{:?}", ev),
                            }
                            .into())
                        }
                    }
                }
                out.push(sv);
            }
            Event::Open(other) => cur.skip_element(other)?,
            Event::Close("snapshotVersions") => return Ok(()),
            ev => {
                return Err(xml::Error::UnexpectedEvent {
                    expected: "<snapshotVersion>".to_string(),
                    found: format!("{:?}", ev),
                }
                .into())
            }
        }
    }
}

fn elem(f: &mut fmt::Formatter<'_>, indent: usize, name: &str, value: &str) -> fmt::Result {
    for _ in 0..indent {
        f.write_str("  ")?;
    }
    writeln!(f, "<{}>{}</{}>", name, xml::escape(value), name)
}

impl Display for Metadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<metadata>\n")?;
        if let Some(g) = &self.group_id {
            elem(f, 1, "groupId", g)?;
        }
        if let Some(a) = &self.artifact_id {
            elem(f, 1, "artifactId", a)?;
        }
        if let Some(v) = &self.version {
            elem(f, 1, "version", v)?;
        }
        if let Some(v) = &self.versioning {
            f.write_str("  <versioning>\n")?;
            if let Some(latest) = &v.latest {
                elem(f, 2, "latest", latest)?;
            }
            if let Some(release) = &v.release {
                elem(f, 2, "release", release)?;
            }
            if let Some(s) = &v.snapshot {
                f.write_str("    <snapshot>\n")?;
                if let Some(ts) = &s.timestamp {
                    elem(f, 3, "timestamp", ts)?;
                }
                elem(f, 3, "buildNumber", &s.build_number.to_string())?;
                if s.local_copy {
                    elem(f, 3, "localCopy", "true")?;
                }
                f.write_str("    </snapshot>\n")?;
            }
            if !v.versions.is_empty() {
                f.write_str("    <versions>\n")?;
                for version in &v.versions {
                    elem(f, 3, "version", version)?;
                }
                f.write_str("    </versions>\n")?;
            }
            if let Some(lu) = &v.last_updated {
                elem(f, 2, "lastUpdated", lu)?;
            }
            if !v.snapshot_versions.is_empty() {
                f.write_str("    <snapshotVersions>\n")?;
                for sv in &v.snapshot_versions {
                    f.write_str("      <snapshotVersion>\n")?;
                    if let Some(c) = &sv.classifier {
                        elem(f, 4, "classifier", c)?;
                    }
                    elem(f, 4, "extension", &sv.extension)?;
                    elem(f, 4, "value", &sv.value)?;
                    if let Some(u) = &sv.updated {
                        elem(f, 4, "updated", u)?;
                    }
                    f.write_str("      </snapshotVersion>\n")?;
                }
                f.write_str("    </snapshotVersions>\n")?;
            }
            f.write_str("  </versioning>\n")?;
        }
        if !self.plugins.is_empty() {
            f.write_str("  <plugins>\n")?;
            for p in &self.plugins {
                f.write_str("    <plugin>\n")?;
                if let Some(n) = &p.name {
                    elem(f, 3, "name", n)?;
                }
                elem(f, 3, "prefix", &p.prefix)?;
                elem(f, 3, "artifactId", &p.artifact_id)?;
                f.write_str("    </plugin>\n")?;
            }
            f.write_str("  </plugins>\n")?;
        }
        f.write_str("</metadata>\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const ARTIFACT_LEVEL: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<metadata>
  <groupId>com.example</groupId>
  <artifactId>widget</artifactId>
  <versioning>
    <latest>1.1</latest>
    <release>1.1</release>
    <versions>
      <version>1.0</version>
      <version>1.1</version>
    </versions>
    <lastUpdated>20240801123456</lastUpdated>
  </versioning>
</metadata>
"#;

    #[test]
    fn parses_artifact_level() {
        let m = Metadata::parse(ARTIFACT_LEVEL).expect("must parse");
        assert_eq!(Some("com.example".to_string()), m.group_id);
        assert_eq!(Some("widget".to_string()), m.artifact_id);
        let v = m.versioning.expect("versioning");
        assert_eq!(Some("1.1".to_string()), v.latest);
        assert_eq!(vec!["1.0".to_string(), "1.1".to_string()], v.versions);
        assert_eq!(Some("20240801123456".to_string()), v.last_updated);
    }

    #[test]
    fn parses_snapshot_level() {
        let m = Metadata::parse(
            r#"<metadata>
  <groupId>com.example</groupId>
  <artifactId>widget</artifactId>
  <version>1.0-SNAPSHOT</version>
  <versioning>
    <snapshot>
      <timestamp>20240801.123456</timestamp>
      <buildNumber>3</buildNumber>
    </snapshot>
    <lastUpdated>20240801123456</lastUpdated>
    <snapshotVersions>
      <snapshotVersion>
        <extension>jar</extension>
        <value>1.0-20240801.123456-3</value>
        <updated>20240801123456</updated>
      </snapshotVersion>
    </snapshotVersions>
  </versioning>
</metadata>"#,
        )
        .expect("must parse");
        let v = m.versioning.expect("versioning");
        let s = v.snapshot.expect("snapshot");
        assert_eq!(Some("20240801.123456".to_string()), s.timestamp);
        assert_eq!(3, s.build_number);
        assert!(!s.local_copy);
        assert_eq!(1, v.snapshot_versions.len());
        assert_eq!("1.0-20240801.123456-3", v.snapshot_versions[0].value);
    }

    #[test]
    fn skips_unknown_elements() {
        let m = Metadata::parse(
            "<metadata><groupId>g</groupId><modelVersion>1.1.0</modelVersion>\
             <artifactId>a</artifactId></metadata>",
        )
        .expect("must parse");
        assert_eq!(Some("g".to_string()), m.group_id);
        assert_eq!(Some("a".to_string()), m.artifact_id);
    }

    #[test]
    fn rejects_duplicates_and_garbage() {
        assert_eq!(
            Err(Error::DuplicateElement("groupId")),
            Metadata::parse("<metadata><groupId>a</groupId><groupId>b</groupId></metadata>")
        );
        assert!(Metadata::parse("<metadata><groupId>a</metadata>").is_err());
        assert_eq!(
            Err(Error::TrailingContent),
            Metadata::parse("<metadata></metadata><metadata></metadata>")
        );
        assert!(matches!(
            Metadata::parse(
                "<metadata><versioning><snapshot><buildNumber>x</buildNumber>\
                 </snapshot></versioning></metadata>"
            ),
            Err(Error::InvalidValue { .. })
        ));
    }

    #[test]
    fn display_roundtrip() {
        let m = Metadata::parse(ARTIFACT_LEVEL).expect("must parse");
        let rendered = m.to_string();
        assert_eq!(m, Metadata::parse(&rendered).expect("must reparse"));
    }

    #[test]
    fn merge_unions_versions_and_takes_newer_header() {
        let mut base = Metadata::parse(ARTIFACT_LEVEL).unwrap();
        let newer = Metadata::parse(
            r#"<metadata>
  <groupId>com.example</groupId>
  <artifactId>widget</artifactId>
  <versioning>
    <latest>1.2</latest>
    <release>1.2</release>
    <versions>
      <version>1.1</version>
      <version>1.2</version>
    </versions>
    <lastUpdated>20240901000000</lastUpdated>
  </versioning>
</metadata>"#,
        )
        .unwrap();

        assert!(base.merge(&newer));
        let v = base.versioning.as_ref().unwrap();
        assert_eq!(
            vec!["1.0".to_string(), "1.1".to_string(), "1.2".to_string()],
            v.versions
        );
        assert_eq!(Some("1.2".to_string()), v.latest);
        assert_eq!(Some("20240901000000".to_string()), v.last_updated);

        // Merging the same document again changes nothing.
        assert!(!base.merge(&newer));
    }

    #[test]
    fn merge_keeps_header_of_newer_self() {
        let mut base = Metadata::parse(ARTIFACT_LEVEL).unwrap();
        let older = Metadata {
            versioning: Some(Versioning {
                latest: Some("0.9".to_string()),
                versions: vec!["0.9".to_string()],
                last_updated: Some("20230101000000".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };

        assert!(base.merge(&older));
        let v = base.versioning.as_ref().unwrap();
        // The stale latest must not clobber ours, but its version joins the list.
        assert_eq!(Some("1.1".to_string()), v.latest);
        assert!(v.versions.contains(&"0.9".to_string()));
        assert_eq!(Some("20240801123456".to_string()), v.last_updated);
    }

    #[test]
    fn merge_plugins_by_prefix() {
        let mut base = Metadata::parse(
            "<metadata><plugins><plugin><prefix>widget</prefix>\
             <artifactId>widget-maven-plugin</artifactId></plugin></plugins></metadata>",
        )
        .unwrap();
        let other = Metadata::parse(
            "<metadata><plugins>\
             <plugin><prefix>widget</prefix><artifactId>other-widget-plugin</artifactId></plugin>\
             <plugin><prefix>gadget</prefix><artifactId>gadget-maven-plugin</artifactId></plugin>\
             </plugins></metadata>",
        )
        .unwrap();

        assert!(base.merge(&other));
        assert_eq!(2, base.plugins.len());
        // First prefix mapping wins.
        assert_eq!("widget-maven-plugin", base.plugins[0].artifact_id);
        assert_eq!("gadget", base.plugins[1].prefix);
    }
}
