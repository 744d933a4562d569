//! Stackfile parsing
//!
//! A stackfile is a YAML mapping from layer name to declaration:
//!
//! ```yaml
//! base:
//!   from:
//!     type: docker
//!     url: docker://ubuntu:24.04
//!   run: apt-get update && apt-get install -y curl
//! app:
//!   from:
//!     type: built
//!     tag: base
//!   import:
//!     - ./app.tar.gz
//!     - strata://tools/usr/bin/tool
//!   run: tar -C /opt -xf /strata/app.tar.gz
//!   environment:
//!     APP_HOME: /opt/app
//!   full_command: /opt/app/bin/serve --port 8080
//! ```
//!
//! Layers are kept in file order. `$NAME` and `${NAME}` are substituted
//! textually before parsing.

use crate::config::context::WORKING_TREE;
use crate::error::{StrataError, StrataResult};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Transport an upstream image is fetched with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// Container registry
    Docker,
    /// Local OCI layout, `path:tag`
    Oci,
}

/// Upstream image reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    pub transport: Transport,
    pub url: String,
}

impl ImageRef {
    /// Source argument in skopeo's `transport:reference` syntax
    pub fn skopeo_source(&self) -> String {
        match self.transport {
            Transport::Docker if self.url.starts_with("docker://") => self.url.clone(),
            Transport::Docker => format!("docker://{}", self.url),
            Transport::Oci if self.url.starts_with("oci:") => self.url.clone(),
            Transport::Oci => format!("oci:{}", self.url),
        }
    }
}

/// What a layer starts from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "BaseSpec", into = "BaseSpec")]
pub enum LayerBase {
    /// Empty root filesystem
    Scratch,
    /// Upstream image
    Image(ImageRef),
    /// Snapshot of another layer in the same stackfile
    Built(String),
}

/// On-disk form of `from:`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct BaseSpec {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tag: Option<String>,
}

impl TryFrom<BaseSpec> for LayerBase {
    type Error = String;

    fn try_from(spec: BaseSpec) -> Result<Self, Self::Error> {
        let image = |transport: Transport, url: Option<String>| match url {
            Some(url) if !url.is_empty() => Ok(LayerBase::Image(ImageRef { transport, url })),
            _ => Err(format!("from type '{}' requires a url", spec.kind)),
        };
        match spec.kind.as_str() {
            "scratch" => Ok(LayerBase::Scratch),
            "docker" => image(Transport::Docker, spec.url.clone()),
            "oci" => image(Transport::Oci, spec.url.clone()),
            "built" => match spec.tag {
                Some(tag) if !tag.is_empty() => Ok(LayerBase::Built(tag)),
                _ => Err("from type 'built' requires a tag".to_string()),
            },
            other => Err(format!(
                "unknown from type '{}' (expected scratch, docker, oci or built)",
                other
            )),
        }
    }
}

impl From<LayerBase> for BaseSpec {
    fn from(base: LayerBase) -> Self {
        match base {
            LayerBase::Scratch => BaseSpec {
                kind: "scratch".to_string(),
                url: None,
                tag: None,
            },
            LayerBase::Image(image) => BaseSpec {
                kind: match image.transport {
                    Transport::Docker => "docker".to_string(),
                    Transport::Oci => "oci".to_string(),
                },
                url: Some(image.url),
                tag: None,
            },
            LayerBase::Built(tag) => BaseSpec {
                kind: "built".to_string(),
                url: None,
                tag: Some(tag),
            },
        }
    }
}

/// A command given either as one shell-words string or as an argv list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommandSpec {
    Shell(String),
    Argv(Vec<String>),
}

impl CommandSpec {
    pub fn argv(&self) -> StrataResult<Vec<String>> {
        match self {
            Self::Argv(argv) => Ok(argv.clone()),
            Self::Shell(line) => shell_words::split(line).map_err(|e| {
                StrataError::User(format!("Cannot split command '{}': {}", line, e))
            }),
        }
    }
}

/// One layer of a stackfile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LayerDeclaration {
    /// Mapping key in the stackfile
    #[serde(skip_deserializing)]
    pub name: String,

    pub from: LayerBase,

    #[serde(default, deserialize_with = "one_or_many")]
    pub import: Vec<String>,

    #[serde(default, deserialize_with = "one_or_many")]
    pub run: Vec<String>,

    #[serde(default, deserialize_with = "scalar_map")]
    pub environment: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmd: Option<CommandSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<CommandSpec>,

    /// Sets the entrypoint and clears any inherited cmd
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_command: Option<CommandSpec>,

    #[serde(default)]
    pub volumes: Vec<String>,

    #[serde(default, deserialize_with = "scalar_map")]
    pub labels: BTreeMap<String, String>,

    #[serde(default)]
    pub working_dir: String,

    /// Snapshot only; never committed to the OCI layout
    #[serde(default)]
    pub build_only: bool,
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(s)) => vec![s],
        Some(OneOrMany::Many(v)) => v,
    })
}

/// String map whose YAML values may be any scalar (`PORT: 8080`)
fn scalar_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;
    use serde_yaml::Value;

    let raw = Option::<BTreeMap<String, Value>>::deserialize(deserializer)?.unwrap_or_default();
    raw.into_iter()
        .map(|(key, value)| match value {
            Value::String(s) => Ok((key, s)),
            Value::Number(n) => Ok((key, n.to_string())),
            Value::Bool(b) => Ok((key, b.to_string())),
            _ => Err(D::Error::custom(format!("value of {} must be a scalar", key))),
        })
        .collect()
}

/// Parsed stackfile, layers in file order
#[derive(Debug, Clone)]
pub struct Stackfile {
    pub path: PathBuf,
    pub layers: Vec<LayerDeclaration>,
}

impl Stackfile {
    /// Read and parse a stackfile from disk
    pub async fn from_file(path: &Path, substitutions: &[(String, String)]) -> StrataResult<Self> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StrataError::PathNotFound(path.to_path_buf())
            } else {
                StrataError::io(format!("reading stackfile {}", path.display()), e)
            }
        })?;
        Self::parse(&content, path, substitutions)
    }

    /// Parse stackfile content; `path` is used for error messages
    pub fn parse(
        content: &str,
        path: &Path,
        substitutions: &[(String, String)],
    ) -> StrataResult<Self> {
        let content = substitute(content, substitutions);
        let invalid = |reason: String| StrataError::Declaration {
            path: path.to_path_buf(),
            reason,
        };

        let document: serde_yaml::Value =
            serde_yaml::from_str(&content).map_err(|e| invalid(e.to_string()))?;
        let mapping = match document {
            serde_yaml::Value::Mapping(m) => m,
            serde_yaml::Value::Null => serde_yaml::Mapping::new(),
            _ => return Err(invalid("top level must be a mapping of layer names".to_string())),
        };
        if mapping.is_empty() {
            return Err(invalid("no layers declared".to_string()));
        }

        let mut layers = Vec::with_capacity(mapping.len());
        for (key, value) in mapping {
            let name = key
                .as_str()
                .ok_or_else(|| invalid(format!("layer name {:?} is not a string", key)))?
                .to_string();
            validate_layer_name(&name)?;

            let mut decl: LayerDeclaration = serde_yaml::from_value(value)
                .map_err(|e| invalid(format!("layer {}: {}", name, e)))?;
            decl.name = name;
            layers.push(decl);
        }

        Ok(Self {
            path: path.to_path_buf(),
            layers,
        })
    }

    pub fn get(&self, name: &str) -> Option<&LayerDeclaration> {
        self.layers.iter().find(|l| l.name == name)
    }
}

/// Replace `${NAME}` and `$NAME` with their values
pub fn substitute(content: &str, substitutions: &[(String, String)]) -> String {
    let mut out = content.to_string();
    for (key, value) in substitutions {
        out = out.replace(&format!("${{{}}}", key), value);
        out = out.replace(&format!("${}", key), value);
    }
    out
}

/// Parse a `NAME=value` substitution argument
pub fn parse_substitution(arg: &str) -> StrataResult<(String, String)> {
    match arg.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(StrataError::User(format!(
            "Invalid substitution '{}': expected NAME=value",
            arg
        ))),
    }
}

/// Layer names become directory names under the roots and imports dirs.
pub fn validate_layer_name(name: &str) -> StrataResult<()> {
    let invalid = |reason: &str| StrataError::InvalidLayerName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if name.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if name == WORKING_TREE {
        return Err(invalid("reserved for the working tree"));
    }
    if name.starts_with('.') {
        return Err(invalid("must not start with '.'"));
    }
    if name.contains('/') || name.contains('\\') || name.contains("..") || name.contains('\0') {
        return Err(invalid("must not contain path separators or '..'"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(invalid(
            "must contain only alphanumeric characters, '.', '-' or '_'",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const STACKFILE: &str = r#"
base:
  from:
    type: docker
    url: docker://ubuntu:24.04
  run: apt-get update
tools:
  from:
    type: built
    tag: base
  build_only: true
  import:
    - data.txt
  run:
    - mkdir -p /opt/tools
    - cp /strata/data.txt /opt/tools/
app:
  from:
    type: built
    tag: tools
  environment:
    FOO: bar
    PORT: 8080
  cmd: ["/bin/app", "--flag"]
  full_command: /bin/app --serve "two words"
  volumes: [/data]
  labels:
    maintainer: ops
  working_dir: /srv
"#;

    fn parse(content: &str) -> StrataResult<Stackfile> {
        Stackfile::parse(content, Path::new("strata.yaml"), &[])
    }

    #[test]
    fn layers_keep_file_order() {
        let stack = parse(STACKFILE).unwrap();
        let names: Vec<&str> = stack.layers.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, ["base", "tools", "app"]);
    }

    #[test]
    fn parses_all_fields() {
        let stack = parse(STACKFILE).unwrap();

        let base = stack.get("base").unwrap();
        assert_eq!(
            base.from,
            LayerBase::Image(ImageRef {
                transport: Transport::Docker,
                url: "docker://ubuntu:24.04".to_string(),
            })
        );
        assert_eq!(base.run, vec!["apt-get update"]);

        let tools = stack.get("tools").unwrap();
        assert!(tools.build_only);
        assert_eq!(tools.import, vec!["data.txt"]);
        assert_eq!(tools.run.len(), 2);

        let app = stack.get("app").unwrap();
        assert_eq!(app.from, LayerBase::Built("tools".to_string()));
        assert_eq!(app.environment.get("FOO").unwrap(), "bar");
        assert_eq!(app.environment.get("PORT").unwrap(), "8080");
        assert_eq!(
            app.cmd.as_ref().unwrap().argv().unwrap(),
            vec!["/bin/app", "--flag"]
        );
        assert_eq!(
            app.full_command.as_ref().unwrap().argv().unwrap(),
            vec!["/bin/app", "--serve", "two words"]
        );
        assert_eq!(app.volumes, vec!["/data"]);
        assert_eq!(app.working_dir, "/srv");
    }

    #[test]
    fn scratch_needs_no_url() {
        let stack = parse("empty:\n  from:\n    type: scratch\n").unwrap();
        assert_eq!(stack.layers[0].from, LayerBase::Scratch);
    }

    #[test]
    fn image_base_requires_url() {
        let err = parse("a:\n  from:\n    type: docker\n").unwrap_err();
        assert!(err.to_string().contains("requires a url"));
    }

    #[test]
    fn unknown_field_is_rejected() {
        let err = parse("a:\n  from:\n    type: scratch\n  runn: echo\n").unwrap_err();
        assert!(matches!(err, StrataError::Declaration { .. }));
    }

    #[test]
    fn reserved_and_unsafe_names_are_rejected() {
        assert!(validate_layer_name(".working").is_err());
        assert!(validate_layer_name("../etc").is_err());
        assert!(validate_layer_name("a b").is_err());
        assert!(validate_layer_name("ubuntu-24.04_base").is_ok());
    }

    #[test]
    fn substitution_applies_before_parse() {
        let content = "a:\n  from:\n    type: docker\n    url: ${IMAGE}:$TAG\n";
        let subs = vec![
            ("IMAGE".to_string(), "docker://alpine".to_string()),
            ("TAG".to_string(), "3.20".to_string()),
        ];
        let stack = Stackfile::parse(content, Path::new("s.yaml"), &subs).unwrap();
        match &stack.layers[0].from {
            LayerBase::Image(image) => assert_eq!(image.url, "docker://alpine:3.20"),
            other => panic!("unexpected base {other:?}"),
        }
    }

    #[test]
    fn parse_substitution_arg() {
        assert_eq!(
            parse_substitution("K=a=b").unwrap(),
            ("K".to_string(), "a=b".to_string())
        );
        assert!(parse_substitution("=x").is_err());
        assert!(parse_substitution("novalue").is_err());
    }

    #[test]
    fn skopeo_source_adds_transport() {
        let docker = ImageRef {
            transport: Transport::Docker,
            url: "alpine:3.20".to_string(),
        };
        assert_eq!(docker.skopeo_source(), "docker://alpine:3.20");
        let oci = ImageRef {
            transport: Transport::Oci,
            url: "/srv/oci:base".to_string(),
        };
        assert_eq!(oci.skopeo_source(), "oci:/srv/oci:base");
    }
}
