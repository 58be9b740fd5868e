//! Generic `docker build` command processor
//!
//! Knows nothing about where builds run. Everything it needs comes from a
//! [`CommandHost`]: a build client, a config-file view and the I/O streams.

use crate::client::{ImageBuildClient, ImageBuildOptions};
use crate::config::ConfigFile;
use crate::context::ContextBuilder;
use crate::error::{BuildError, BuildResult};
use crate::progress::{BuildProgress, display_build_output};
use crate::reference;
use std::collections::{BTreeMap, HashMap};
use std::io::{Cursor, Read, Write};
use std::path::Path;

pub const FLAG_TAG: &str = "tag";
pub const FLAG_FILE: &str = "file";
pub const FLAG_NO_CACHE: &str = "no-cache";
pub const FLAG_PULL: &str = "pull";
pub const FLAG_QUIET: &str = "quiet";
pub const FLAG_DISABLE_CONTENT_TRUST: &str = "disable-content-trust";
pub const FLAG_BUILD_ARG: &str = "build-arg";

/// Context argument meaning "read a tar archive from the input stream"
pub const STDIN_CONTEXT: &str = "-";

const DEFAULT_DOCKERFILE: &str = "Dockerfile";

/// Environment a build command runs in
pub trait CommandHost: Send {
    fn client(&self) -> &dyn ImageBuildClient;

    fn config_file(&self) -> ConfigFile;

    fn input(&mut self) -> &mut dyn Read;

    fn out(&mut self) -> &mut dyn Write;

    fn err(&mut self) -> &mut dyn Write;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlagValue {
    Bool(bool),
    String(String),
    Array(Vec<String>),
}

impl FlagValue {
    fn render(&self) -> String {
        match self {
            FlagValue::Bool(value) => value.to_string(),
            FlagValue::String(value) => value.clone(),
            FlagValue::Array(values) => format!("[{}]", values.join(",")),
        }
    }
}

/// Named flags of the build command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildFlagSet {
    flags: BTreeMap<&'static str, FlagValue>,
}

impl Default for BuildFlagSet {
    fn default() -> Self {
        let flags = BTreeMap::from([
            (FLAG_TAG, FlagValue::Array(Vec::new())),
            (FLAG_FILE, FlagValue::String(String::new())),
            (FLAG_NO_CACHE, FlagValue::Bool(false)),
            (FLAG_PULL, FlagValue::Bool(false)),
            (FLAG_QUIET, FlagValue::Bool(false)),
            (FLAG_DISABLE_CONTENT_TRUST, FlagValue::Bool(false)),
            (FLAG_BUILD_ARG, FlagValue::Array(Vec::new())),
        ]);
        Self { flags }
    }
}

impl BuildFlagSet {
    /// Assign a flag from its textual value
    ///
    /// Array flags accumulate; every other kind is replaced.
    pub fn set(&mut self, name: &str, value: &str) -> BuildResult<()> {
        let flag = self
            .flags
            .get_mut(name)
            .ok_or_else(|| BuildError::UnknownFlag(name.to_string()))?;

        match flag {
            FlagValue::Bool(current) => {
                *current = parse_bool(value).ok_or_else(|| BuildError::InvalidFlag {
                    name: name.to_string(),
                    value: value.to_string(),
                    message: "expected a boolean".to_string(),
                })?;
            }
            FlagValue::String(current) => *current = value.to_string(),
            FlagValue::Array(values) => values.push(value.to_string()),
        }

        tracing::trace!("flag --{}={}", name, value);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<String> {
        self.flags.get(name).map(FlagValue::render)
    }

    pub fn get_array(&self, name: &str) -> Option<&[String]> {
        match self.flags.get(name) {
            Some(FlagValue::Array(values)) => Some(values),
            _ => None,
        }
    }

    fn bool(&self, name: &str) -> bool {
        matches!(self.flags.get(name), Some(FlagValue::Bool(true)))
    }

    fn string(&self, name: &str) -> &str {
        match self.flags.get(name) {
            Some(FlagValue::String(value)) => value,
            _ => "",
        }
    }

    fn array(&self, name: &str) -> &[String] {
        self.get_array(name).unwrap_or_default()
    }
}

/// Same spellings as Go's `strconv.ParseBool`, which pflag uses
fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

/// `K=V` or bare `K`, which takes its value from the environment when set
fn parse_build_args(values: &[String]) -> HashMap<String, Option<String>> {
    values
        .iter()
        .map(|arg| match arg.split_once('=') {
            Some((key, value)) => (key.to_string(), Some(value.to_string())),
            None => (arg.clone(), std::env::var(arg).ok()),
        })
        .collect()
}

pub struct BuildCommand {
    host: Box<dyn CommandHost>,
    flags: BuildFlagSet,
}

impl BuildCommand {
    pub fn new(host: Box<dyn CommandHost>) -> Self {
        Self {
            host,
            flags: BuildFlagSet::default(),
        }
    }

    pub fn flags(&self) -> &BuildFlagSet {
        &self.flags
    }

    pub fn flags_mut(&mut self) -> &mut BuildFlagSet {
        &mut self.flags
    }

    /// Run the build with `args` as positional arguments
    pub async fn run(&mut self, args: &[String]) -> BuildResult<()> {
        let [context_arg] = args else {
            return Err(BuildError::ArgumentCount(args.len()));
        };

        if !self.flags.bool(FLAG_DISABLE_CONTENT_TRUST) {
            return Err(BuildError::ContentTrust);
        }

        let tags = self.flags.array(FLAG_TAG).to_vec();
        if let Some(invalid) = tags.iter().find(|tag| !reference::is_valid(tag)) {
            return Err(BuildError::InvalidReference(invalid.clone()));
        }

        let (context, dockerfile) = self.read_context(context_arg)?;
        let quiet = self.flags.bool(FLAG_QUIET);

        let options = ImageBuildOptions {
            tags,
            dockerfile,
            build_args: parse_build_args(self.flags.array(FLAG_BUILD_ARG)),
            pull_parent: self.flags.bool(FLAG_PULL),
            no_cache: self.flags.bool(FLAG_NO_CACHE),
            suppress_output: quiet,
            auth_configs: self.host.config_file().auth_configs(),
        };

        let client = self.host.client();
        client.ping().await?;
        tracing::debug!(
            "Sending build context ({} bytes) to {}",
            context.len(),
            display_host(client)
        );

        let progress_name = options
            .tags
            .first()
            .cloned()
            .unwrap_or_else(|| context_arg.clone());
        let response = client
            .image_build(Box::new(Cursor::new(context)), options)
            .await?;

        if quiet {
            // Output is only shown when the build fails
            let mut buffered = Vec::new();
            match display_build_output(response.body, &mut buffered, &BuildProgress::hidden()).await
            {
                Ok(output) => {
                    if let Some(image_id) = output.image_id {
                        writeln!(self.host.out(), "{}", image_id)?;
                    }
                    Ok(())
                }
                Err(e) => {
                    self.host.err().write_all(&buffered)?;
                    Err(e)
                }
            }
        } else {
            let progress = BuildProgress::new(&progress_name);
            let output = display_build_output(response.body, self.host.out(), &progress).await?;
            if let Some(image_id) = output.image_id {
                tracing::info!("Successfully built: {}", image_id);
            }
            Ok(())
        }
    }

    /// Build context bytes and the Dockerfile path inside them
    fn read_context(&mut self, context_arg: &str) -> BuildResult<(Vec<u8>, String)> {
        let file = self.flags.string(FLAG_FILE).to_string();

        if context_arg == STDIN_CONTEXT {
            let mut data = Vec::new();
            self.host.input().read_to_end(&mut data)?;
            let dockerfile = if file.is_empty() {
                DEFAULT_DOCKERFILE.to_string()
            } else {
                file
            };
            return Ok((data, dockerfile));
        }

        let dockerfile = (!file.is_empty()).then(|| Path::new(&file));
        let archive = ContextBuilder::create_context(Path::new(context_arg), dockerfile)?;
        Ok((archive.data, archive.dockerfile))
    }
}

fn display_host(client: &dyn ImageBuildClient) -> String {
    match client.daemon_host() {
        host if host.is_empty() => "remote builder".to_string(),
        host => host,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::bridge::stream_bridge;
    use crate::client::{BuildContext, ImageBuildResponse};
    use async_trait::async_trait;
    use std::fs;
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    /// Write sink that stays readable after being handed to a host
    #[derive(Clone, Default)]
    pub(crate) struct SharedBuffer(pub Arc<Mutex<Vec<u8>>>);

    impl SharedBuffer {
        pub(crate) fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct Recorded {
        pings: usize,
        options: Vec<ImageBuildOptions>,
        context: Vec<u8>,
    }

    struct ScriptedClient {
        recorded: Arc<Mutex<Recorded>>,
        body: Vec<u8>,
    }

    #[async_trait]
    impl ImageBuildClient for ScriptedClient {
        async fn image_build(
            &self,
            mut context: BuildContext,
            options: ImageBuildOptions,
        ) -> BuildResult<ImageBuildResponse> {
            let mut uploaded = Vec::new();
            context.read_to_end(&mut uploaded).await?;
            {
                let mut recorded = self.recorded.lock().unwrap();
                recorded.options.push(options);
                recorded.context = uploaded;
            }

            let (mut writer, reader) = stream_bridge();
            let body = self.body.clone();
            tokio::spawn(async move {
                let _ = writer.write_all(&body).await;
                let _ = writer.close().await;
            });
            Ok(ImageBuildResponse { body: reader })
        }

        fn daemon_host(&self) -> String {
            String::new()
        }

        async fn ping(&self) -> BuildResult<()> {
            self.recorded.lock().unwrap().pings += 1;
            Ok(())
        }
    }

    struct TestHost {
        client: ScriptedClient,
        input: Cursor<Vec<u8>>,
        out: SharedBuffer,
        err: SharedBuffer,
    }

    impl CommandHost for TestHost {
        fn client(&self) -> &dyn ImageBuildClient {
            &self.client
        }

        fn config_file(&self) -> ConfigFile {
            ConfigFile::default()
        }

        fn input(&mut self) -> &mut dyn Read {
            &mut self.input
        }

        fn out(&mut self) -> &mut dyn Write {
            &mut self.out
        }

        fn err(&mut self) -> &mut dyn Write {
            &mut self.err
        }
    }

    struct Harness {
        command: BuildCommand,
        recorded: Arc<Mutex<Recorded>>,
        out: SharedBuffer,
        err: SharedBuffer,
    }

    fn harness(body: &[u8], input: &[u8]) -> Harness {
        let recorded = Arc::new(Mutex::new(Recorded::default()));
        let out = SharedBuffer::default();
        let err = SharedBuffer::default();
        let host = TestHost {
            client: ScriptedClient {
                recorded: recorded.clone(),
                body: body.to_vec(),
            },
            input: Cursor::new(input.to_vec()),
            out: out.clone(),
            err: err.clone(),
        };

        let mut command = BuildCommand::new(Box::new(host));
        command
            .flags_mut()
            .set(FLAG_DISABLE_CONTENT_TRUST, "true")
            .unwrap();

        Harness {
            command,
            recorded,
            out,
            err,
        }
    }

    fn context_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("Dockerfile"), "FROM alpine").unwrap();
        dir
    }

    const SUCCESS_BODY: &[u8] =
        b"{\"stream\":\"Step 1/1 : FROM alpine\\n\"}\n{\"aux\":{\"ID\":\"sha256:feed\"}}\n";

    #[test]
    fn test_flag_set_defaults_and_rendering() {
        let mut flags = BuildFlagSet::default();
        assert_eq!(flags.get(FLAG_NO_CACHE).as_deref(), Some("false"));
        assert_eq!(flags.get(FLAG_FILE).as_deref(), Some(""));

        flags.set(FLAG_NO_CACHE, "t").unwrap();
        flags.set(FLAG_BUILD_ARG, "A=1").unwrap();
        flags.set(FLAG_BUILD_ARG, "B=2").unwrap();
        flags.set(FLAG_FILE, "Dockerfile.dev").unwrap();

        assert_eq!(flags.get(FLAG_NO_CACHE).as_deref(), Some("true"));
        assert_eq!(flags.get(FLAG_BUILD_ARG).as_deref(), Some("[A=1,B=2]"));
        assert_eq!(
            flags.get_array(FLAG_BUILD_ARG).unwrap(),
            &["A=1".to_string(), "B=2".to_string()]
        );
        assert_eq!(flags.get(FLAG_FILE).as_deref(), Some("Dockerfile.dev"));
        assert!(flags.get_array(FLAG_FILE).is_none());
    }

    #[test]
    fn test_flag_set_rejects_bad_input() {
        let mut flags = BuildFlagSet::default();

        assert!(matches!(
            flags.set("squash", "true"),
            Err(BuildError::UnknownFlag(name)) if name == "squash"
        ));
        assert!(matches!(
            flags.set(FLAG_PULL, "yes"),
            Err(BuildError::InvalidFlag { name, .. }) if name == FLAG_PULL
        ));
        assert_eq!(flags.get(FLAG_PULL).as_deref(), Some("false"));
    }

    #[test]
    fn test_parse_build_args() {
        temp_env::with_vars(
            [("CRBUILD_TEST_FROM_ENV", Some("env-value")), ("CRBUILD_TEST_UNSET", None)],
            || {
                let args = parse_build_args(&[
                    "VERSION=1.2".to_string(),
                    "EMPTY=".to_string(),
                    "CRBUILD_TEST_FROM_ENV".to_string(),
                    "CRBUILD_TEST_UNSET".to_string(),
                ]);

                assert_eq!(args["VERSION"].as_deref(), Some("1.2"));
                assert_eq!(args["EMPTY"].as_deref(), Some(""));
                assert_eq!(args["CRBUILD_TEST_FROM_ENV"].as_deref(), Some("env-value"));
                assert_eq!(args["CRBUILD_TEST_UNSET"], None);
            },
        );
    }

    #[tokio::test]
    async fn test_run_builds_directory_context() {
        let dir = context_dir();
        let mut h = harness(SUCCESS_BODY, b"");
        h.command.flags_mut().set(FLAG_TAG, "us.icr.io/ns/app:1").unwrap();
        h.command.flags_mut().set(FLAG_NO_CACHE, "true").unwrap();
        h.command.flags_mut().set(FLAG_BUILD_ARG, "A=1").unwrap();

        let args = vec![dir.path().to_string_lossy().into_owned()];
        h.command.run(&args).await.unwrap();

        let recorded = h.recorded.lock().unwrap();
        assert_eq!(recorded.pings, 1);
        let options = &recorded.options[0];
        assert_eq!(options.tags, vec!["us.icr.io/ns/app:1".to_string()]);
        assert_eq!(options.dockerfile, "Dockerfile");
        assert!(options.no_cache);
        assert!(!options.pull_parent);
        assert!(!options.suppress_output);
        assert_eq!(options.build_args["A"].as_deref(), Some("1"));
        // gzip magic
        assert_eq!(&recorded.context[..2], &[0x1f, 0x8b]);

        assert!(h.out.contents().contains("Step 1/1 : FROM alpine"));
    }

    #[tokio::test]
    async fn test_run_reads_context_from_input() {
        let mut h = harness(SUCCESS_BODY, b"raw tar bytes");
        h.command.flags_mut().set(FLAG_TAG, "app").unwrap();

        h.command.run(&[STDIN_CONTEXT.to_string()]).await.unwrap();

        let recorded = h.recorded.lock().unwrap();
        assert_eq!(recorded.context, b"raw tar bytes");
        assert_eq!(recorded.options[0].dockerfile, "Dockerfile");
    }

    #[tokio::test]
    async fn test_quiet_prints_only_image_id() {
        let dir = context_dir();
        let mut h = harness(SUCCESS_BODY, b"");
        h.command.flags_mut().set(FLAG_QUIET, "true").unwrap();

        let args = vec![dir.path().to_string_lossy().into_owned()];
        h.command.run(&args).await.unwrap();

        assert_eq!(h.out.contents(), "sha256:feed\n");
        assert!(h.recorded.lock().unwrap().options[0].suppress_output);
    }

    #[tokio::test]
    async fn test_quiet_failure_writes_buffered_output_to_err() {
        let dir = context_dir();
        let body = b"{\"stream\":\"Step 1/1\\n\"}\n{\"errorDetail\":{\"message\":\"boom\"}}";
        let mut h = harness(body, b"");
        h.command.flags_mut().set(FLAG_QUIET, "1").unwrap();

        let args = vec![dir.path().to_string_lossy().into_owned()];
        let result = h.command.run(&args).await;

        assert!(matches!(result, Err(BuildError::BuildFailed(message)) if message == "boom"));
        assert_eq!(h.out.contents(), "");
        assert_eq!(h.err.contents(), "Step 1/1\n");
    }

    #[tokio::test]
    async fn test_run_requires_one_argument() {
        let mut h = harness(SUCCESS_BODY, b"");

        let result = h.command.run(&[]).await;
        assert!(matches!(result, Err(BuildError::ArgumentCount(0))));

        let result = h.command.run(&["a".to_string(), "b".to_string()]).await;
        assert!(matches!(result, Err(BuildError::ArgumentCount(2))));
        assert_eq!(h.recorded.lock().unwrap().pings, 0);
    }

    #[tokio::test]
    async fn test_run_requires_disabled_content_trust() {
        let dir = context_dir();
        let mut h = harness(SUCCESS_BODY, b"");
        h.command
            .flags_mut()
            .set(FLAG_DISABLE_CONTENT_TRUST, "false")
            .unwrap();

        let args = vec![dir.path().to_string_lossy().into_owned()];
        let result = h.command.run(&args).await;

        assert!(matches!(result, Err(BuildError::ContentTrust)));
        assert_eq!(h.recorded.lock().unwrap().pings, 0);
    }

    #[tokio::test]
    async fn test_run_rejects_invalid_tag() {
        let dir = context_dir();
        let mut h = harness(SUCCESS_BODY, b"");
        h.command.flags_mut().set(FLAG_TAG, "ok:1").unwrap();
        h.command.flags_mut().set(FLAG_TAG, "Not Valid").unwrap();

        let args = vec![dir.path().to_string_lossy().into_owned()];
        let result = h.command.run(&args).await;

        assert!(matches!(result, Err(BuildError::InvalidReference(tag)) if tag == "Not Valid"));
        assert!(h.recorded.lock().unwrap().options.is_empty());
    }
}
