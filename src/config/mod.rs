use crate::error::{LaunchError, Result};
use crate::process::RestartPolicy;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Which tool the resource sampler asks for process-tree statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SamplerBackend {
    /// `ps` filtered by process group
    #[default]
    Ps,
    /// In-process `sysinfo` snapshot of the process and its descendants
    Sysinfo,
}

/// Supervisor-wide tuning knobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Grace period between SIGTERM and SIGKILL on stop (in milliseconds)
    #[serde(default = "default_kill_timeout")]
    pub kill_timeout_ms: u64,

    /// How often buffered log records are delivered (in milliseconds)
    #[serde(default = "default_log_batch_interval")]
    pub log_batch_interval_ms: u64,

    /// Longest output line kept intact; longer lines are truncated
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,

    /// How long output readers may keep draining after the process exits
    #[serde(default = "default_reader_drain")]
    pub reader_drain_ms: u64,

    #[serde(default)]
    pub sampler: SamplerBackend,
}

// Default value functions for serde
fn default_kill_timeout() -> u64 {
    10_000
}

fn default_log_batch_interval() -> u64 {
    100
}

fn default_max_line_bytes() -> usize {
    crate::logs::DEFAULT_MAX_LINE_BYTES
}

fn default_reader_drain() -> u64 {
    250
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            kill_timeout_ms: default_kill_timeout(),
            log_batch_interval_ms: default_log_batch_interval(),
            max_line_bytes: default_max_line_bytes(),
            reader_drain_ms: default_reader_drain(),
            sampler: SamplerBackend::default(),
        }
    }
}

impl SupervisorConfig {
    pub fn kill_timeout(&self) -> Duration {
        Duration::from_millis(self.kill_timeout_ms)
    }

    pub fn log_batch_interval(&self) -> Duration {
        Duration::from_millis(self.log_batch_interval_ms)
    }

    pub fn reader_drain(&self) -> Duration {
        Duration::from_millis(self.reader_drain_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.log_batch_interval_ms == 0 {
            return Err(LaunchError::ConfigValidationError(
                "log_batch_interval_ms must be at least 1".to_string(),
            ));
        }

        if self.max_line_bytes == 0 {
            return Err(LaunchError::ConfigValidationError(
                "max_line_bytes must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

/// A launchable process as declared in a project file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessDefinition {
    /// Display name, unique within a project
    pub name: String,

    /// Shell command to run
    pub base_command: String,

    /// Optional grouping label for display
    #[serde(default)]
    pub group: Option<String>,

    /// Working directory, relative paths resolve against the project root
    #[serde(default)]
    pub cwd: Option<PathBuf>,

    #[serde(default)]
    pub env: HashMap<String, String>,

    #[serde(default)]
    pub restart: Option<RestartPolicy>,

    /// Configurable arguments appended to the base command
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<ArgConfig>,
}

/// How an argument is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArgKind {
    /// On/off switch mapped to outputs through `values`
    Toggle,
    /// One of `values`
    Select,
    /// Free text, optionally preceded by `output_prefix`
    Input,
}

/// A value an argument can take: booleans, numbers or text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgScalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl std::fmt::Display for ArgScalar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArgScalar::Bool(b) => write!(f, "{}", b),
            ArgScalar::Int(i) => write!(f, "{}", i),
            ArgScalar::Float(x) => write!(f, "{}", x),
            ArgScalar::Text(s) => write!(f, "{}", s),
        }
    }
}

/// One choice of a toggle or select argument and the text it contributes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArgValue {
    pub value: ArgScalar,
    pub output: String,
}

/// A configurable argument of a process definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArgConfig {
    #[serde(rename = "type")]
    pub kind: ArgKind,

    pub name: String,

    #[serde(default)]
    pub default: Option<ArgScalar>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_prefix: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<ArgValue>,
}

impl ArgConfig {
    /// Command-line text for `value`; empty when it maps to nothing
    pub fn output_for(&self, value: Option<&ArgScalar>) -> String {
        match self.kind {
            ArgKind::Toggle | ArgKind::Select => value
                .and_then(|v| self.values.iter().find(|candidate| &candidate.value == v))
                .map(|candidate| candidate.output.clone())
                .unwrap_or_default(),
            ArgKind::Input => {
                let text = value.map(ArgScalar::to_string).unwrap_or_default();
                match self.output_prefix.as_deref() {
                    Some(prefix) if !prefix.is_empty() && !text.is_empty() => {
                        format!("{} {}", prefix, text)
                    }
                    _ => text,
                }
            }
        }
    }

    /// Command-line text for the default value
    pub fn default_output(&self) -> String {
        self.output_for(self.default.as_ref())
    }
}

impl ProcessDefinition {
    /// Full shell command line: the base command followed by the default
    /// output of each argument, in declaration order
    pub fn command_line(&self) -> String {
        let mut line = self.base_command.trim().to_string();
        for output in self.args.iter().map(ArgConfig::default_output) {
            let output = output.trim();
            if output.is_empty() {
                continue;
            }
            line.push(' ');
            line.push_str(output);
        }
        line
    }

    /// Effective working directory for a project rooted at `root`
    pub fn resolve_cwd(&self, root: &Path) -> PathBuf {
        match self.cwd {
            Some(ref cwd) if cwd.is_absolute() => cwd.clone(),
            Some(ref cwd) => root.join(cwd),
            None => root.to_path_buf(),
        }
    }

    fn expand_env_vars(&mut self) {
        if let Some(ref cwd) = self.cwd {
            self.cwd = Some(PathBuf::from(expand_env_in_string(&cwd.to_string_lossy())));
        }

        self.env = self
            .env
            .iter()
            .map(|(k, v)| (k.clone(), expand_env_in_string(v)))
            .collect();
    }
}

/// Expand `$VAR` and `${VAR}` references from the host environment
fn expand_env_in_string(s: &str) -> String {
    if !s.contains('$') {
        return s.to_string();
    }

    let mut vars: Vec<(String, String)> = std::env::vars().collect();
    // Longest names first so $HOME_DIR is not eaten by $HOME
    vars.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

    let mut result = s.to_string();
    for (key, value) in vars {
        result = result.replace(&format!("${{{}}}", key), &value);
        result = result.replace(&format!("${}", key), &value);
    }
    result
}

/// A project file: supervisor settings plus the processes it can launch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectFile {
    pub project_name: String,

    #[serde(default)]
    pub settings: SupervisorConfig,

    #[serde(default)]
    pub processes: Vec<ProcessDefinition>,

    /// Directory the project file lives in
    #[serde(skip)]
    pub root: PathBuf,
}

impl ProjectFile {
    /// Load a project file (supports TOML and JSON)
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| LaunchError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let extension = path.extension().and_then(|s| s.to_str()).unwrap_or("");

        let mut project = match extension {
            "toml" => Self::parse_toml(&contents)?,
            "json" => Self::parse_json(&contents)?,
            _ => {
                return Err(LaunchError::InvalidConfig(format!(
                    "Unsupported file format: {}. Use .toml or .json",
                    extension
                )))
            }
        };

        project.root = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        for process in &mut project.processes {
            process.expand_env_vars();
        }

        project.validate()?;
        Ok(project)
    }

    fn parse_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents)
            .map_err(|e| LaunchError::InvalidConfig(format!("Failed to parse TOML: {}", e)))
    }

    fn parse_json(contents: &str) -> Result<Self> {
        serde_json::from_str(contents)
            .map_err(|e| LaunchError::InvalidConfig(format!("Failed to parse JSON: {}", e)))
    }

    pub fn validate(&self) -> Result<()> {
        self.settings.validate()?;

        if self.processes.is_empty() {
            return Err(LaunchError::InvalidConfig(
                "No process configuration found in file".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for process in &self.processes {
            if process.name.trim().is_empty() {
                return Err(LaunchError::ConfigValidationError(
                    "process name must not be empty".to_string(),
                ));
            }
            if process.base_command.trim().is_empty() {
                return Err(LaunchError::ConfigValidationError(format!(
                    "process '{}' has an empty base_command",
                    process.name
                )));
            }
            let mut arg_names = HashSet::new();
            for arg in &process.args {
                if arg.name.trim().is_empty() || !arg_names.insert(arg.name.as_str()) {
                    return Err(LaunchError::ConfigValidationError(format!(
                        "process '{}' has an empty or duplicate argument name '{}'",
                        process.name, arg.name
                    )));
                }
            }
            if !seen.insert(process.name.as_str()) {
                return Err(LaunchError::ConfigValidationError(format!(
                    "duplicate process name: {}",
                    process.name
                )));
            }
        }

        Ok(())
    }

    pub fn find(&self, name: &str) -> Option<&ProcessDefinition> {
        self.processes.iter().find(|p| p.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn definition(name: &str, command: &str) -> ProcessDefinition {
        ProcessDefinition {
            name: name.to_string(),
            base_command: command.to_string(),
            group: None,
            cwd: None,
            env: HashMap::new(),
            restart: None,
            args: vec![],
        }
    }

    #[test]
    fn test_supervisor_config_defaults() {
        let config = SupervisorConfig::default();
        assert_eq!(config.kill_timeout(), Duration::from_secs(10));
        assert_eq!(config.log_batch_interval(), Duration::from_millis(100));
        assert_eq!(config.max_line_bytes, 1024 * 1024);
        assert_eq!(config.sampler, SamplerBackend::Ps);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_supervisor_config_rejects_zero_interval() {
        let config = SupervisorConfig {
            log_batch_interval_ms: 0,
            ..SupervisorConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(LaunchError::ConfigValidationError(_))
        ));
    }

    fn arg(kind: ArgKind, name: &str, default: Option<ArgScalar>) -> ArgConfig {
        ArgConfig {
            kind,
            name: name.to_string(),
            default,
            output_prefix: None,
            values: vec![],
        }
    }

    fn choice(value: ArgScalar, output: &str) -> ArgValue {
        ArgValue {
            value,
            output: output.to_string(),
        }
    }

    #[test]
    fn test_toggle_arg_output() {
        let mut watch = arg(ArgKind::Toggle, "watch", Some(ArgScalar::Bool(true)));
        watch.values = vec![
            choice(ArgScalar::Bool(true), "--watch"),
            choice(ArgScalar::Bool(false), ""),
        ];
        assert_eq!(watch.default_output(), "--watch");
        assert_eq!(watch.output_for(Some(&ArgScalar::Bool(false))), "");
        // A string "true" is not the boolean true
        assert_eq!(watch.output_for(Some(&ArgScalar::Text("true".into()))), "");
    }

    #[test]
    fn test_select_arg_output() {
        let mut mode = arg(ArgKind::Select, "mode", Some(ArgScalar::Text("prod".into())));
        mode.values = vec![
            choice(ArgScalar::Text("dev".into()), "--mode development"),
            choice(ArgScalar::Text("prod".into()), "--mode production"),
        ];
        assert_eq!(mode.default_output(), "--mode production");
        assert_eq!(mode.output_for(Some(&ArgScalar::Text("dev".into()))), "--mode development");
        assert_eq!(mode.output_for(Some(&ArgScalar::Text("qa".into()))), "");
        assert_eq!(mode.output_for(None), "");
    }

    #[test]
    fn test_input_arg_output_with_prefix() {
        let mut port = arg(ArgKind::Input, "port", Some(ArgScalar::Int(3000)));
        port.output_prefix = Some("--port".to_string());
        assert_eq!(port.default_output(), "--port 3000");
        // Empty input drops the prefix too
        assert_eq!(port.output_for(Some(&ArgScalar::Text(String::new()))), "");

        let filter = arg(ArgKind::Input, "filter", Some(ArgScalar::Text("api".into())));
        assert_eq!(filter.default_output(), "api");
    }

    #[test]
    fn test_command_line_from_arg_defaults() {
        let mut def = definition("web", "npm run dev");
        let mut open = arg(ArgKind::Toggle, "open", Some(ArgScalar::Bool(false)));
        open.values = vec![
            choice(ArgScalar::Bool(true), "--open"),
            choice(ArgScalar::Bool(false), ""),
        ];
        let mut port = arg(ArgKind::Input, "port", Some(ArgScalar::Text("3000".into())));
        port.output_prefix = Some("--port".to_string());
        let mut host = arg(ArgKind::Select, "host", Some(ArgScalar::Text("lan".into())));
        host.values = vec![choice(ArgScalar::Text("lan".into()), "--host 0.0.0.0")];

        def.args = vec![open, port, host];
        assert_eq!(def.command_line(), "npm run dev --port 3000 --host 0.0.0.0");
    }

    #[test]
    fn test_parse_typed_args() {
        let toml_content = r#"
            project_name = "args"

            [[processes]]
            name = "web"
            base_command = "vite"

            [[processes.args]]
            type = "toggle"
            name = "watch"
            default = true
            values = [
                { value = true, output = "--watch" },
                { value = false, output = "" },
            ]

            [[processes.args]]
            type = "select"
            name = "level"
            default = 2
            values = [
                { value = 1, output = "-v" },
                { value = 2, output = "-vv" },
            ]

            [[processes.args]]
            type = "input"
            name = "port"
            default = "5173"
            output_prefix = "--port"
        "#;

        let project = ProjectFile::parse_toml(toml_content).unwrap();
        let web = &project.processes[0];
        assert_eq!(web.args.len(), 3);
        assert_eq!(web.args[0].kind, ArgKind::Toggle);
        assert_eq!(web.args[1].default, Some(ArgScalar::Int(2)));
        assert_eq!(web.args[2].output_prefix.as_deref(), Some("--port"));
        assert_eq!(web.command_line(), "vite --watch -vv --port 5173");
    }

    #[test]
    fn test_parse_json_args_with_null_default() {
        let json_content = r#"
            {
                "project_name": "args",
                "processes": [{
                    "name": "api",
                    "base_command": "go run .",
                    "args": [{ "type": "input", "name": "tags", "default": null }]
                }]
            }
        "#;

        let project = ProjectFile::parse_json(json_content).unwrap();
        assert_eq!(project.processes[0].args[0].default, None);
        assert_eq!(project.processes[0].command_line(), "go run .");
    }

    #[test]
    fn test_validate_duplicate_arg_names() {
        let mut def = definition("web", "vite");
        def.args = vec![
            arg(ArgKind::Input, "port", None),
            arg(ArgKind::Input, "port", None),
        ];
        let project = ProjectFile {
            project_name: "dup-args".to_string(),
            settings: SupervisorConfig::default(),
            processes: vec![def],
            root: PathBuf::from("."),
        };
        assert!(matches!(
            project.validate(),
            Err(LaunchError::ConfigValidationError(_))
        ));
    }

    #[test]
    fn test_resolve_cwd() {
        let root = Path::new("/projects/app");

        let mut def = definition("web", "make");
        assert_eq!(def.resolve_cwd(root), PathBuf::from("/projects/app"));

        def.cwd = Some(PathBuf::from("frontend"));
        assert_eq!(def.resolve_cwd(root), PathBuf::from("/projects/app/frontend"));

        def.cwd = Some(PathBuf::from("/srv/api"));
        assert_eq!(def.resolve_cwd(root), PathBuf::from("/srv/api"));
    }

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("LAUNCHKIT_TEST_DIR", "/tmp");
        std::env::set_var("LAUNCHKIT_TEST_VALUE", "on");

        let mut def = definition("web", "make");
        def.cwd = Some(PathBuf::from("${LAUNCHKIT_TEST_DIR}/web"));
        def.env.insert("MODE".to_string(), "$LAUNCHKIT_TEST_VALUE".to_string());
        def.expand_env_vars();

        assert_eq!(def.cwd, Some(PathBuf::from("/tmp/web")));
        assert_eq!(def.env.get("MODE"), Some(&"on".to_string()));
    }

    #[test]
    fn test_parse_toml_project() {
        let toml_content = r#"
            project_name = "stack"

            [settings]
            kill_timeout_ms = 2000
            sampler = "sysinfo"

            [[processes]]
            name = "api"
            base_command = "cargo run"
            cwd = "api"

            [processes.restart]
            enabled = true
            max_retries = 5

            [[processes]]
            name = "web"
            base_command = "npm start"
            env = { PORT = "3000" }
        "#;

        let project = ProjectFile::parse_toml(toml_content).unwrap();
        assert_eq!(project.project_name, "stack");
        assert_eq!(project.settings.kill_timeout_ms, 2000);
        assert_eq!(project.settings.log_batch_interval_ms, 100);
        assert_eq!(project.settings.sampler, SamplerBackend::Sysinfo);
        assert_eq!(project.processes.len(), 2);

        let restart = project.processes[0].restart.as_ref().unwrap();
        assert!(restart.enabled);
        assert_eq!(restart.max_retries, 5);
        assert_eq!(restart.delay_ms, 1000);
        assert_eq!(restart.reset_after_ms, 30_000);

        assert_eq!(project.processes[1].env.get("PORT"), Some(&"3000".to_string()));
    }

    #[test]
    fn test_parse_json_project() {
        let json_content = r#"
            {
                "project_name": "stack",
                "processes": [
                    { "name": "db", "base_command": "docker compose up db", "group": "infra" }
                ]
            }
        "#;

        let project = ProjectFile::parse_json(json_content).unwrap();
        assert_eq!(project.settings, SupervisorConfig::default());
        assert_eq!(project.processes[0].group.as_deref(), Some("infra"));
    }

    #[test]
    fn test_validate_duplicate_names() {
        let project = ProjectFile {
            project_name: "dup".to_string(),
            settings: SupervisorConfig::default(),
            processes: vec![definition("a", "true"), definition("a", "false")],
            root: PathBuf::from("."),
        };
        assert!(matches!(
            project.validate(),
            Err(LaunchError::ConfigValidationError(_))
        ));
    }

    #[test]
    fn test_validate_empty_command() {
        let project = ProjectFile {
            project_name: "empty".to_string(),
            settings: SupervisorConfig::default(),
            processes: vec![definition("a", "   ")],
            root: PathBuf::from("."),
        };
        assert!(project.validate().is_err());
    }

    #[test]
    fn test_from_file_sets_root() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("launch.toml");

        fs::write(
            &config_path,
            r#"
                project_name = "demo"
                [[processes]]
                name = "echo"
                base_command = "echo hi"
            "#,
        )
        .unwrap();

        let project = ProjectFile::from_file(&config_path).unwrap();
        assert_eq!(project.root, temp_dir.path());
        assert!(project.find("echo").is_some());
        assert!(project.find("missing").is_none());
    }

    #[test]
    fn test_from_file_unsupported_format() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("launch.yaml");

        fs::write(&config_path, "project_name: test").unwrap();

        let result = ProjectFile::from_file(&config_path);
        assert!(matches!(result, Err(LaunchError::InvalidConfig(_))));
    }
}
