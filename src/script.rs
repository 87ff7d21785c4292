//! Event scripts: a line-per-event description of what a page does.
//!
//! ```text
//! # comments and blank lines are ignored
//! install
//! activate
//! fetch /api/announcements
//! navigate /reservas
//! post /api/deliveries {"apartment":"12B"}
//! wait
//! ```
//!
//! Lifecycle events are awaited before the next line is read. Fetch events
//! are queued and answered concurrently; `wait` (and the end of the script)
//! collects every outstanding answer and lets background cache writes land.

use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use url::Url;

use crate::cache::{InstallReport, Served};
use crate::event::{self, Reply, WorkerHandle};
use crate::net::{resolve, Request};
use crate::worker::WorkerError;

#[derive(Debug, Clone)]
pub struct Command {
  pub name: &'static str,
  pub aliases: &'static [&'static str],
  pub description: &'static str,
}

/// All available commands
pub const COMMANDS: &[Command] = &[
  Command {
    name: "install",
    aliases: &["i"],
    description: "Populate the current bucket from the asset manifest",
  },
  Command {
    name: "activate",
    aliases: &["a", "claim"],
    description: "Evict stale buckets and take control of fetches",
  },
  Command {
    name: "fetch",
    aliases: &["f", "get"],
    description: "GET a URL as a subresource",
  },
  Command {
    name: "navigate",
    aliases: &["n", "nav", "open"],
    description: "GET a URL as a page navigation",
  },
  Command {
    name: "post",
    aliases: &[],
    description: "POST a URL with an optional body",
  },
  Command {
    name: "put",
    aliases: &[],
    description: "PUT a URL with an optional body",
  },
  Command {
    name: "delete",
    aliases: &["del", "rm"],
    description: "DELETE a URL",
  },
  Command {
    name: "wait",
    aliases: &["w", "sync"],
    description: "Wait for every outstanding fetch",
  },
];

/// Resolve a command word.
///
/// Exact name, then exact alias, then a unique name prefix.
pub fn find_command(input: &str) -> Option<&'static Command> {
  let input_lower = input.to_lowercase();
  if input_lower.is_empty() {
    return None;
  }

  if let Some(cmd) = COMMANDS
    .iter()
    .find(|c| c.name == input_lower || c.aliases.contains(&input_lower.as_str()))
  {
    return Some(cmd);
  }

  let mut prefixed = COMMANDS.iter().filter(|c| c.name.starts_with(&input_lower));
  match (prefixed.next(), prefixed.next()) {
    (Some(cmd), None) => Some(cmd),
    _ => None,
  }
}

/// One parsed script line.
#[derive(Debug, Clone)]
pub enum Step {
  Install,
  Activate,
  Fetch(Request),
  Wait,
}

/// Parse a single line. Blank lines and `#` comments yield `None`.
pub fn parse_line(line: &str, origin: &Url) -> Result<Option<Step>> {
  let line = line.trim();
  if line.is_empty() || line.starts_with('#') {
    return Ok(None);
  }

  let (word, rest) = match line.split_once(char::is_whitespace) {
    Some((word, rest)) => (word, rest.trim()),
    None => (line, ""),
  };

  let cmd = find_command(word).ok_or_else(|| eyre!("Unknown command '{}'", word))?;

  let step = match cmd.name {
    "install" => Step::Install,
    "activate" => Step::Activate,
    "wait" => Step::Wait,
    name => {
      let (target, body) = match rest.split_once(char::is_whitespace) {
        Some((target, body)) => (target, Some(body.trim())),
        None => (rest, None),
      };
      if target.is_empty() {
        return Err(eyre!("'{}' needs a URL", name));
      }
      let url = resolve(origin, target)?;

      let request = match name {
        "fetch" => Request::get(url),
        "navigate" => Request::navigate(url),
        "post" => Request::new(Method::POST, url),
        "put" => Request::new(Method::PUT, url),
        "delete" => Request::new(Method::DELETE, url),
        other => return Err(eyre!("Unhandled command '{}'", other)),
      };

      match body.filter(|b| !b.is_empty()) {
        Some(body) if !request.is_get() => Step::Fetch(
          request
            .with_header("content-type", "application/json")
            .with_body(body.to_string()),
        ),
        Some(_) => return Err(eyre!("'{}' does not take a body", name)),
        None => Step::Fetch(request),
      }
    }
  };

  Ok(Some(step))
}

/// Parse a whole script, reporting the line number of the first error.
pub fn parse_script(text: &str, origin: &Url) -> Result<Vec<(usize, Step)>> {
  let mut steps = Vec::new();
  for (index, line) in text.lines().enumerate() {
    let line_no = index + 1;
    if let Some(step) = parse_line(line, origin).map_err(|e| eyre!("line {}: {}", line_no, e))? {
      steps.push((line_no, step));
    }
  }
  Ok(steps)
}

/// What happened to one script line.
#[derive(Debug)]
pub enum Outcome {
  Installed(InstallReport),
  Activated(Vec<String>),
  Served { request: Request, served: Served },
  Failed(WorkerError),
}

/// Replay parsed steps through a running worker host.
///
/// Outcomes are returned in script order.
pub async fn replay(handle: &WorkerHandle, steps: Vec<(usize, Step)>) -> Vec<(usize, Outcome)> {
  let mut outcomes = Vec::with_capacity(steps.len());
  let mut outstanding: Vec<(usize, Request, Reply<Served>)> = Vec::new();

  for (line, step) in steps {
    match step {
      Step::Install => {
        drain(&mut outstanding, &mut outcomes).await;
        let outcome = match handle.install().await {
          Ok(report) => Outcome::Installed(report),
          Err(error) => Outcome::Failed(error),
        };
        outcomes.push((line, outcome));
      }
      Step::Activate => {
        // Not drained: fetches already queued keep running during activation
        let outcome = match handle.activate().await {
          Ok(deleted) => Outcome::Activated(deleted),
          Err(error) => Outcome::Failed(error),
        };
        outcomes.push((line, outcome));
      }
      Step::Fetch(request) => match handle.dispatch_fetch(request.clone()) {
        Ok(reply) => outstanding.push((line, request, reply)),
        Err(error) => outcomes.push((line, Outcome::Failed(error))),
      },
      Step::Wait => {
        drain(&mut outstanding, &mut outcomes).await;
        if let Err(error) = handle.settle().await {
          outcomes.push((line, Outcome::Failed(error)));
        }
      }
    }
  }
  drain(&mut outstanding, &mut outcomes).await;
  // Only fails if the host is gone, which every pending answer already reported
  let _ = handle.settle().await;

  outcomes.sort_by_key(|(line, _)| *line);
  outcomes
}

async fn drain(
  outstanding: &mut Vec<(usize, Request, Reply<Served>)>,
  outcomes: &mut Vec<(usize, Outcome)>,
) {
  for (line, request, reply) in outstanding.drain(..) {
    let outcome = match event::wait(reply).await {
      Ok(served) => Outcome::Served { request, served },
      Err(error) => Outcome::Failed(error),
    };
    outcomes.push((line, outcome));
  }
}
