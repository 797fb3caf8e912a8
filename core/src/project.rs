//! Project metadata supplied by the build: application properties and the
//! inputs needed to launch the companion process.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Location of the application properties inside a project.
pub const APPLICATION_PROPERTIES: &str = "src/main/resources/application.properties";

/// Property holding the shared secret of the remote dev-tools endpoint.
pub const DEV_TOOLS_REMOTE_SECRET: &str = "spring.devtools.remote.secret";

/// Entry point of the remote dev-tools client.
pub const REMOTE_APPLICATION_MAIN: &str = "org.springframework.boot.devtools.RemoteSpringApplication";

/// Port the application listens on when none is configured.
pub const DEFAULT_SERVER_PORT: u16 = 8080;

/// Property keys, which moved between framework major versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyKeys {
    pub server_port: &'static str,
    pub context_path: &'static str,
    pub keystore: &'static str,
}

impl PropertyKeys {
    pub fn for_version(version: Option<&str>) -> Self {
        let legacy = version
            .and_then(|v| v.trim().split('.').next())
            .is_some_and(|major| major == "1");

        Self {
            server_port: "server.port",
            context_path: if legacy {
                "server.context-path"
            } else {
                "server.servlet.context-path"
            },
            keystore: "server.ssl.key-store",
        }
    }
}

/// Parsed `application.properties`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplicationProperties {
    values: BTreeMap<String, String>,
    framework_version: Option<String>,
}

impl ApplicationProperties {
    /// Parses Java properties syntax: `key=value`, `key: value` or
    /// `key value`, `#`/`!` comments, trailing-backslash continuations.
    ///
    /// Backslash escapes are decoded in keys and values (`\=`, `\:`, `\ `,
    /// `\t`, `\n`, `\uXXXX`). A malformed `\u` escape is kept as a plain `u`.
    pub fn parse(content: &str) -> Self {
        let mut values = BTreeMap::new();
        let mut logical = String::new();

        for raw in content.lines() {
            let line = raw.trim_start();
            let is_comment = line.starts_with('#') || line.starts_with('!');
            if logical.is_empty() && (line.is_empty() || is_comment) {
                continue;
            }

            if ends_with_continuation(line) {
                logical.push_str(&line[..line.len() - 1]);
                continue;
            }
            logical.push_str(line);

            if let Some((key, value)) = split_property(&logical) {
                values.insert(key, value);
            }
            logical.clear();
        }
        if let Some((key, value)) = split_property(&logical) {
            values.insert(key, value);
        }

        Self {
            values,
            framework_version: None,
        }
    }

    /// Reads a properties file; a missing file yields empty properties.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => Ok(Self::parse(&content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(Error::Config(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            ))),
        }
    }

    /// Selects version-specific property keys.
    pub fn with_framework_version(mut self, version: Option<&str>) -> Self {
        self.framework_version = version.map(str::to_string);
        self
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            framework_version: None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    fn non_blank(&self, key: &str) -> Option<&str> {
        self.get(key).map(str::trim).filter(|v| !v.is_empty())
    }

    pub fn keys(&self) -> PropertyKeys {
        PropertyKeys::for_version(self.framework_version.as_deref())
    }

    /// Port the application listens on inside the pod.
    pub fn server_port(&self) -> Result<u16> {
        let key = self.keys().server_port;
        match self.non_blank(key) {
            None => Ok(DEFAULT_SERVER_PORT),
            Some(port) => port
                .parse()
                .map_err(|_| Error::Config(format!("Invalid {} value: {}", key, port))),
        }
    }

    /// Servlet context path, empty when unset.
    pub fn context_path(&self) -> &str {
        self.get(self.keys().context_path).unwrap_or("")
    }

    /// Whether TLS is configured, i.e. the endpoint speaks https.
    pub fn has_keystore(&self) -> bool {
        self.non_blank(self.keys().keystore).is_some()
    }

    pub fn remote_secret(&self) -> Option<&str> {
        self.non_blank(DEV_TOOLS_REMOTE_SECRET)
    }
}

fn ends_with_continuation(line: &str) -> bool {
    let trailing = line.chars().rev().take_while(|c| *c == '\\').count();
    trailing % 2 == 1
}

fn split_property(line: &str) -> Option<(String, String)> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let mut split_at = line.len();
    let mut escaped = false;
    for (i, c) in line.char_indices() {
        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == '=' || c == ':' || c.is_whitespace() {
            split_at = i;
            break;
        }
    }
    let key = &line[..split_at];

    let rest = line[split_at..].trim_start();
    let value = rest
        .strip_prefix('=')
        .or_else(|| rest.strip_prefix(':'))
        .unwrap_or(rest)
        .trim_start();

    Some((unescape(key), unescape(value)))
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('f') => out.push('\u{000C}'),
            Some('u') => {
                let hex: String = chars.clone().take(4).collect();
                let decoded = (hex.len() == 4 && hex.chars().all(|h| h.is_ascii_hexdigit()))
                    .then(|| u32::from_str_radix(&hex, 16).ok())
                    .flatten()
                    .and_then(char::from_u32);
                match decoded {
                    Some(ch) => {
                        out.push(ch);
                        chars.nth(3);
                    }
                    None => out.push('u'),
                }
            }
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

/// Inputs needed to launch the companion client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompanionLaunch {
    /// Java launcher.
    pub java: PathBuf,
    /// Project and tool classpath entries, in order.
    pub classpath: Vec<PathBuf>,
    /// The companion tool's own artifact, appended last.
    pub companion_jar: Option<PathBuf>,
    /// Fully-qualified entry point.
    pub main_class: String,
    /// System property the secret is passed as.
    pub secret_property: String,
    /// Secret used when the application properties don't define one.
    pub fallback_secret: Option<String>,
}

impl Default for CompanionLaunch {
    fn default() -> Self {
        Self {
            java: PathBuf::from("java"),
            classpath: Vec::new(),
            companion_jar: None,
            main_class: REMOTE_APPLICATION_MAIN.to_string(),
            secret_property: DEV_TOOLS_REMOTE_SECRET.to_string(),
            fallback_secret: None,
        }
    }
}

/// Everything the watcher needs to know about the local project.
#[derive(Debug, Clone, Default)]
pub struct ProjectMetadata {
    pub properties: ApplicationProperties,
    pub companion: CompanionLaunch,
}

impl ProjectMetadata {
    /// Loads `application.properties` from a project directory.
    pub fn load(
        project_dir: &Path,
        framework_version: Option<&str>,
        companion: CompanionLaunch,
    ) -> Result<Self> {
        let properties = ApplicationProperties::load(&project_dir.join(APPLICATION_PROPERTIES))?
            .with_framework_version(framework_version);
        Ok(Self {
            properties,
            companion,
        })
    }

    /// Secret from the application properties, else the launch fallback.
    pub fn remote_secret(&self) -> Option<&str> {
        self.properties.remote_secret().or_else(|| {
            self.companion
                .fallback_secret
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
        })
    }

    /// Whether the project carries the companion tool at all.
    pub fn has_companion(&self) -> bool {
        self.companion.companion_jar.is_some()
    }
}
