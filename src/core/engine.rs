/// Database engines and their dump command templates
///
/// A template is a program plus an argument vector. Placeholders are
/// substituted per argument, so untrusted values (credentials, names)
/// never pass through a shell.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::process::Stdio;
use std::str::FromStr;

/// Default container runtime used to reach the database
pub const DEFAULT_RUNTIME: &str = "docker";

const REDACTED: &str = "****";

/// Database engine of a target
///
/// `Other` keeps engine names found in stored data that this build has no
/// template for. Such targets load and list normally; backing them up
/// fails with `UnsupportedEngine`. New targets never get `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Engine {
    Mysql,
    Mariadb,
    Postgres,
    Other(String),
}

impl Engine {
    pub const ALL: [Engine; 3] = [Engine::Mysql, Engine::Mariadb, Engine::Postgres];

    pub fn as_str(&self) -> &str {
        match self {
            Engine::Mysql => "mysql",
            Engine::Mariadb => "mariadb",
            Engine::Postgres => "postgres",
            Engine::Other(name) => name,
        }
    }

    /// Lenient parse for stored data: unknown names become `Other`
    pub fn from_name(name: &str) -> Self {
        name.parse()
            .unwrap_or_else(|_| Engine::Other(name.trim().to_string()))
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl Serialize for Engine {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Engine {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(Engine::from_name(&name))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownEngine(pub String);

impl fmt::Display for UnknownEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let known: Vec<String> = Engine::ALL.iter().map(|e| e.to_string()).collect();
        write!(f, "unknown engine '{}' (expected one of: {})", self.0, known.join(", "))
    }
}

impl std::error::Error for UnknownEngine {}

impl FromStr for Engine {
    type Err = UnknownEngine;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mysql" => Ok(Engine::Mysql),
            "mariadb" => Ok(Engine::Mariadb),
            "postgres" | "postgresql" => Ok(Engine::Postgres),
            _ => Err(UnknownEngine(s.trim().to_string())),
        }
    }
}

/// Values substituted into a template
#[derive(Clone, Copy)]
pub struct TemplateContext<'a> {
    pub location: &'a str,
    pub database: &'a str,
    pub username: &'a str,
    pub secret: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandTemplate {
    pub program: String,
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default = "default_extension")]
    pub extension: String,
}

fn default_extension() -> String {
    "sql".to_string()
}

impl CommandTemplate {
    /// Built-in template for an engine, reached through `runtime exec <location>`
    pub fn default_for(engine: &Engine, runtime: &str) -> Self {
        let prefix = ["exec", "{location}"];
        let dump: &[&str] = match engine {
            Engine::Mysql => &["mysqldump", "-u", "{username}", "-p{secret}", "{database}"],
            Engine::Mariadb => &["mariadb-dump", "-u", "{username}", "-p{secret}", "{database}"],
            Engine::Postgres => &["pg_dump", "{database}", "-U", "{username}"],
            Engine::Other(_) => &[],
        };

        Self {
            program: runtime.to_string(),
            args: prefix.iter().chain(dump.iter()).map(|s| s.to_string()).collect(),
            env: BTreeMap::new(),
            extension: default_extension(),
        }
    }

    pub fn render(&self, ctx: &TemplateContext<'_>) -> BuiltCommand {
        BuiltCommand {
            program: substitute(&self.program, ctx),
            args: self.args.iter().map(|a| substitute(a, ctx)).collect(),
            env: self
                .env
                .iter()
                .map(|(k, v)| (k.clone(), substitute(v, ctx)))
                .collect(),
            secret: ctx.secret.to_string(),
        }
    }
}

/// Replace `{name}` placeholders in one pass; substituted text is never rescanned
fn substitute(input: &str, ctx: &TemplateContext<'_>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open..];
        let Some(close) = after.find('}') else {
            out.push_str(after);
            return out;
        };

        let value = match &after[1..close] {
            "location" => Some(ctx.location),
            "database" => Some(ctx.database),
            "username" => Some(ctx.username),
            "secret" => Some(ctx.secret),
            _ => None,
        };

        match value {
            Some(v) => out.push_str(v),
            None => out.push_str(&after[..=close]),
        }
        rest = &after[close + 1..];
    }

    out.push_str(rest);
    out
}

/// Replace every occurrence of `secret` in `text`
pub fn redact(text: &str, secret: &str) -> String {
    if secret.is_empty() {
        text.to_string()
    } else {
        text.replace(secret, REDACTED)
    }
}

/// A fully substituted command, ready to spawn
///
/// `Display` prints the invocation with the secret masked, so it is safe
/// to log.
#[derive(Clone)]
pub struct BuiltCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    secret: String,
}

impl BuiltCommand {
    pub fn to_command(&self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        cmd
    }

    pub fn redact(&self, text: &str) -> String {
        redact(text, &self.secret)
    }
}

impl fmt::Display for BuiltCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for key in self.env.keys() {
            write!(f, "{}={} ", key, REDACTED)?;
        }
        write!(f, "{}", self.redact(&self.program))?;
        for arg in &self.args {
            write!(f, " {}", self.redact(arg))?;
        }
        Ok(())
    }
}

impl fmt::Debug for BuiltCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BuiltCommand({})", self)
    }
}

/// Command templates keyed by engine
#[derive(Debug, Clone, Default)]
pub struct CommandTemplates {
    by_engine: HashMap<Engine, CommandTemplate>,
}

impl CommandTemplates {
    /// Built-in templates for every known engine
    pub fn defaults(runtime: &str) -> Self {
        let by_engine = Engine::ALL
            .iter()
            .map(|engine| (engine.clone(), CommandTemplate::default_for(engine, runtime)))
            .collect();
        Self { by_engine }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn get(&self, engine: &Engine) -> Option<&CommandTemplate> {
        self.by_engine.get(engine)
    }

    pub fn insert(&mut self, engine: Engine, template: CommandTemplate) {
        self.by_engine.insert(engine, template);
    }

    pub fn remove(&mut self, engine: &Engine) -> Option<CommandTemplate> {
        self.by_engine.remove(engine)
    }

    pub fn engines(&self) -> Vec<Engine> {
        let mut engines: Vec<Engine> = self.by_engine.keys().cloned().collect();
        engines.sort();
        engines
    }
}
