//! Command line of the companion process.

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;

use crate::error::{Error, Result};
use crate::project::ProjectMetadata;

const REDACTED: &str = "****";

/// Program and arguments of a process to supervise.
#[derive(Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    program: PathBuf,
    args: Vec<OsString>,
    secret: Option<String>,
}

impl ProcessSpec {
    pub fn new<I, S>(program: impl Into<PathBuf>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            secret: None,
        }
    }

    /// Builds the companion client invocation for `url`:
    /// `java -cp <classpath> -D<secret property>=<secret> <main class> <url>`.
    ///
    /// Classpath entries are canonicalized and the companion artifact is
    /// appended last. Fails with [`Error::Config`] when the secret or the
    /// companion artifact is missing, or an entry does not exist.
    pub fn build(project: &ProjectMetadata, url: &str) -> Result<Self> {
        let launch = &project.companion;

        let secret = project.remote_secret().ok_or_else(|| {
            Error::Config(format!(
                "No {} property defined in application.properties or the launch settings",
                launch.secret_property
            ))
        })?;
        let companion_jar = launch
            .companion_jar
            .as_deref()
            .ok_or_else(|| Error::Config("No companion artifact configured".to_string()))?;

        let entries = launch
            .classpath
            .iter()
            .map(PathBuf::as_path)
            .chain(std::iter::once(companion_jar))
            .map(canonical_entry)
            .collect::<Result<Vec<_>>>()?;
        let classpath = std::env::join_paths(&entries)
            .map_err(|e| Error::Config(format!("Invalid classpath: {}", e)))?;

        let mut secret_arg = OsString::from(format!("-D{}=", launch.secret_property));
        secret_arg.push(secret);

        Ok(Self {
            program: launch.java.clone(),
            args: vec![
                OsString::from("-cp"),
                classpath,
                secret_arg,
                OsString::from(&launch.main_class),
                OsString::from(url),
            ],
            secret: Some(secret.to_string()),
        })
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn args(&self) -> &[OsString] {
        &self.args
    }

    /// Command with piped output, ready to spawn.
    pub(crate) fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    fn redact(&self, arg: &OsStr) -> String {
        let arg = arg.to_string_lossy();
        match self.secret.as_deref() {
            Some(secret) => arg.replace(secret, REDACTED),
            None => arg.into_owned(),
        }
    }
}

impl fmt::Debug for ProcessSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let args: Vec<String> = self.args.iter().map(|arg| self.redact(arg)).collect();
        f.debug_struct("ProcessSpec")
            .field("program", &self.program)
            .field("args", &args)
            .finish()
    }
}

fn canonical_entry(entry: &Path) -> Result<PathBuf> {
    std::fs::canonicalize(entry)
        .map_err(|e| Error::Config(format!("Invalid classpath entry {}: {}", entry.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::{
        ApplicationProperties, CompanionLaunch, DEV_TOOLS_REMOTE_SECRET, REMOTE_APPLICATION_MAIN,
    };

    struct Fixture {
        dir: tempfile::TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            std::fs::create_dir(dir.path().join("classes")).unwrap();
            std::fs::write(dir.path().join("devtools.jar"), b"").unwrap();
            Self { dir }
        }

        fn path(&self, name: &str) -> PathBuf {
            self.dir.path().join(name)
        }

        fn project(&self, secret: Option<&str>) -> ProjectMetadata {
            let properties = match secret {
                Some(secret) => ApplicationProperties::from_pairs([(DEV_TOOLS_REMOTE_SECRET, secret)]),
                None => ApplicationProperties::default(),
            };
            ProjectMetadata {
                properties,
                companion: CompanionLaunch {
                    classpath: vec![self.path("classes")],
                    companion_jar: Some(self.path("devtools.jar")),
                    ..Default::default()
                },
            }
        }
    }

    #[test]
    fn test_build_companion_command_line() {
        let fixture = Fixture::new();
        let spec = ProcessSpec::build(&fixture.project(Some("s3cr3t")), "http://host/app").unwrap();

        assert_eq!(spec.program(), Path::new("java"));
        let args = spec.args();
        assert_eq!(args.len(), 5);
        assert_eq!(args[0], "-cp");

        let entries: Vec<PathBuf> = std::env::split_paths(&args[1]).collect();
        assert_eq!(
            entries,
            vec![
                std::fs::canonicalize(fixture.path("classes")).unwrap(),
                std::fs::canonicalize(fixture.path("devtools.jar")).unwrap(),
            ]
        );
        assert!(entries.iter().all(|entry| entry.is_absolute()));

        assert_eq!(args[2], "-Dspring.devtools.remote.secret=s3cr3t");
        assert_eq!(args[3], REMOTE_APPLICATION_MAIN);
        assert_eq!(args[4], "http://host/app");
    }

    #[test]
    fn test_missing_secret_is_config_error() {
        let fixture = Fixture::new();
        let err = ProcessSpec::build(&fixture.project(None), "http://host").unwrap_err();

        assert!(matches!(err, Error::Config(ref msg) if msg.contains(DEV_TOOLS_REMOTE_SECRET)));
    }

    #[test]
    fn test_blank_secret_is_config_error() {
        let fixture = Fixture::new();
        let err = ProcessSpec::build(&fixture.project(Some("   ")), "http://host").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_missing_companion_artifact_is_config_error() {
        let fixture = Fixture::new();
        let mut project = fixture.project(Some("s3cr3t"));
        project.companion.companion_jar = None;

        let err = ProcessSpec::build(&project, "http://host").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_nonexistent_classpath_entry_is_config_error() {
        let fixture = Fixture::new();
        let mut project = fixture.project(Some("s3cr3t"));
        project.companion.classpath.push(fixture.path("missing.jar"));

        let err = ProcessSpec::build(&project, "http://host").unwrap_err();
        assert!(matches!(err, Error::Config(ref msg) if msg.contains("missing.jar")));
    }

    #[test]
    fn test_debug_output_hides_secret() {
        let fixture = Fixture::new();
        let spec = ProcessSpec::build(&fixture.project(Some("s3cr3t")), "http://host").unwrap();

        let debug = format!("{:?}", spec);
        assert!(!debug.contains("s3cr3t"));
        assert!(debug.contains("-Dspring.devtools.remote.secret=****"));
    }
}
