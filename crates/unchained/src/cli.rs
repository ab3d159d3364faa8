//! Command table assembled from bundles
//!
//! Bundles contribute loose commands and command groups. The table keeps
//! one entry per top-level name; when two bundles contribute the same
//! group, their commands are merged with the later bundle winning per
//! command name. There is no mixin-style merging of a single command: an
//! override replaces it outright.

use std::{
    fmt::{self, Write as _},
    io::{BufRead, Write},
    path::PathBuf,
    sync::Arc,
};

use indexmap::IndexMap;
use log::debug;

use crate::{
    app::App,
    error::{Error, Result},
};

/// A command body: receives the booted app and the remaining arguments
pub type CommandFn = Arc<dyn Fn(&App, &[String]) -> anyhow::Result<()> + Send + Sync>;

#[derive(Clone)]
pub struct Command {
    name: String,
    help: Option<String>,
    callback: CommandFn,
}

impl Command {
    pub fn new<F>(name: impl Into<String>, callback: F) -> Self
    where
        F: Fn(&App, &[String]) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            help: None,
            callback: Arc::new(callback),
        }
    }

    #[must_use]
    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn help(&self) -> Option<&str> {
        self.help.as_deref()
    }

    pub fn callback(&self) -> &CommandFn {
        &self.callback
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("name", &self.name)
            .field("help", &self.help)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct CommandGroup {
    name: String,
    help: Option<String>,
    commands: IndexMap<String, Command>,
}

impl CommandGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            help: None,
            commands: IndexMap::new(),
        }
    }

    #[must_use]
    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    #[must_use]
    pub fn command(mut self, command: Command) -> Self {
        self.add_command(command);
        self
    }

    /// Add or replace a command
    pub fn add_command(&mut self, command: Command) -> Option<Command> {
        self.commands.insert(command.name.clone(), command)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn help(&self) -> Option<&str> {
        self.help.as_deref()
    }

    pub fn get(&self, name: &str) -> Option<&Command> {
        self.commands.get(name)
    }

    pub fn commands(&self) -> impl Iterator<Item = &Command> {
        self.commands.values()
    }
}

/// What a bundle's `commands` module contributes
#[derive(Debug, Clone)]
pub enum CommandEntry {
    Command(Command),
    Group(CommandGroup),
}

impl CommandEntry {
    pub fn name(&self) -> &str {
        match self {
            Self::Command(command) => command.name(),
            Self::Group(group) => group.name(),
        }
    }
}

impl From<Command> for CommandEntry {
    fn from(command: Command) -> Self {
        Self::Command(command)
    }
}

impl From<CommandGroup> for CommandEntry {
    fn from(group: CommandGroup) -> Self {
        Self::Group(group)
    }
}

/// Top-level commands and groups of an application
#[derive(Debug, Clone, Default)]
pub struct CommandTable {
    entries: IndexMap<String, CommandEntry>,
}

impl CommandTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a top-level command, replacing anything with the same name
    pub fn add_command(&mut self, command: Command) {
        if self.entries.contains_key(command.name()) {
            debug!("Command {:?} overrides an earlier definition", command.name());
        }
        self.entries
            .insert(command.name.clone(), CommandEntry::Command(command));
    }

    /// Register a group, merging it into an existing group of the same name.
    ///
    /// Commands of `group` replace same-named ones; its help replaces the
    /// existing help when set. A loose command with the group's name is
    /// replaced by the group.
    pub fn add_group(&mut self, group: CommandGroup) {
        match self.entries.get_mut(group.name()) {
            Some(CommandEntry::Group(existing)) => {
                if group.help.is_some() {
                    existing.help = group.help;
                }
                for (name, command) in group.commands {
                    if existing.commands.contains_key(&name) {
                        debug!("Command {:?} in group {:?} overridden", name, existing.name);
                    }
                    existing.commands.insert(name, command);
                }
            }
            _ => {
                self.entries
                    .insert(group.name.clone(), CommandEntry::Group(group));
            }
        }
    }

    pub fn add(&mut self, entry: CommandEntry) {
        match entry {
            CommandEntry::Command(command) => self.add_command(command),
            CommandEntry::Group(group) => self.add_group(group),
        }
    }

    pub fn get(&self, name: &str) -> Option<&CommandEntry> {
        self.entries.get(name)
    }

    pub fn group(&self, name: &str) -> Option<&CommandGroup> {
        match self.entries.get(name) {
            Some(CommandEntry::Group(group)) => Some(group),
            _ => None,
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = &CommandEntry> {
        self.entries.values()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Find the command named by the leading arguments.
    ///
    /// Returns the command and the arguments left for it.
    pub fn resolve<'a>(&self, args: &'a [String]) -> Result<(&Command, &'a [String])> {
        let unknown = |path: &[String]| Error::UnknownCommand {
            path: path.join(" "),
        };
        let Some((first, rest)) = args.split_first() else {
            return Err(unknown(args));
        };
        match self.entries.get(first) {
            Some(CommandEntry::Command(command)) => Ok((command, rest)),
            Some(CommandEntry::Group(group)) => {
                let Some((sub, rest)) = rest.split_first() else {
                    return Err(unknown(&args[..1]));
                };
                group
                    .get(sub)
                    .map(|command| (command, rest))
                    .ok_or_else(|| unknown(&args[..2]))
            }
            None => Err(unknown(&args[..1])),
        }
    }

    /// Run the command named by the leading arguments against `app`
    pub fn invoke(&self, app: &App, args: &[String]) -> Result<()> {
        let (command, rest) = self.resolve(args)?;
        let path = args[..args.len() - rest.len()].join(" ");
        debug!("Invoking command {path:?} with {} argument(s)", rest.len());
        (command.callback)(app, rest).map_err(|source| Error::Command { path, source })
    }

    /// Human-readable overview, one line per command
    pub fn listing(&self) -> String {
        let mut out = String::new();
        for entry in self.entries.values() {
            match entry {
                CommandEntry::Command(command) => {
                    let _ = writeln!(out, "{}", describe(command.name(), command.help()));
                }
                CommandEntry::Group(group) => {
                    let _ = writeln!(out, "{}", describe(group.name(), group.help()));
                    for command in group.commands() {
                        let _ = writeln!(out, "  {}", describe(command.name(), command.help()));
                    }
                }
            }
        }
        out
    }
}

fn describe(name: &str, help: Option<&str>) -> String {
    match help {
        Some(help) => format!("{name:<16} {help}"),
        None => name.to_owned(),
    }
}

/// Ask a yes/no question.
///
/// An empty answer picks `default`; end of input counts as "no". Anything
/// other than y/yes/n/no asks again.
pub fn confirm<R, W>(prompt: &str, default: bool, input: &mut R, output: &mut W) -> Result<bool>
where
    R: BufRead,
    W: Write,
{
    let io_error = |source| Error::Io {
        path: PathBuf::from("<terminal>"),
        source,
    };
    let choices = if default { "[Y/n]" } else { "[y/N]" };
    loop {
        write!(output, "{prompt} {choices}: ").map_err(io_error)?;
        output.flush().map_err(io_error)?;
        let mut answer = String::new();
        if input.read_line(&mut answer).map_err(io_error)? == 0 {
            return Ok(false);
        }
        match answer.trim().to_ascii_lowercase().as_str() {
            "" => return Ok(default),
            "y" | "yes" => return Ok(true),
            "n" | "no" => return Ok(false),
            _ => writeln!(output, "Please answer yes or no.").map_err(io_error)?,
        }
    }
}

/// [`confirm`], failing with [`Error::Cancelled`] on "no"
pub fn require_confirmation<R, W>(prompt: &str, input: &mut R, output: &mut W) -> Result<()>
where
    R: BufRead,
    W: Write,
{
    if confirm(prompt, false, input, output)? {
        Ok(())
    } else {
        Err(Error::Cancelled)
    }
}
