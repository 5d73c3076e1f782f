//! Command-line tokenizer.
//!
//! Grammar, outside quotes:
//!
//! ```text
//! line     := pipeline [ (">" | ">>") word ]
//! pipeline := stage ( "|" stage )*
//! stage    := word+
//! ```
//!
//! Single quotes preserve everything literally. Inside double quotes a
//! backslash escapes `"` and `\`. Outside quotes a backslash escapes any
//! character. `|` and `>` inside quotes are ordinary characters.

use std::fmt;
use std::path::PathBuf;

use crate::error::{ExecError, Result};

/// Program and flags prepended to every stage of an elevated command.
pub(crate) const ELEVATE_PREFIX: [&str; 2] = ["sudo", "-n"];

/// Output redirection at the end of a pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    /// Destination file.
    pub path: PathBuf,
    /// Append (`>>`) rather than truncate (`>`).
    pub append: bool,
}

/// A parsed, validated command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    stages: Vec<Vec<String>>,
    redirect: Option<Redirect>,
    elevated: bool,
}

#[derive(Debug, PartialEq, Eq)]
enum Token {
    Word(String),
    Pipe,
    Redirect { append: bool },
}

impl CommandLine {
    /// Parse and validate a command line.
    ///
    /// # Errors
    ///
    /// Returns `ExecError::InvalidCommand` for an empty line, an unterminated
    /// quote, an empty pipeline stage, or a redirection without exactly one
    /// target at the end of the line.
    pub fn parse(line: &str) -> Result<Self> {
        let tokens = tokenize(line)?;
        if tokens.is_empty() {
            return Err(ExecError::InvalidCommand("empty command".into()));
        }

        let mut stages = Vec::new();
        let mut current: Vec<String> = Vec::new();
        let mut redirect = None;
        let mut iter = tokens.into_iter();

        while let Some(token) = iter.next() {
            match token {
                Token::Word(word) => current.push(word),
                Token::Pipe => {
                    if current.is_empty() {
                        return Err(ExecError::InvalidCommand("empty pipeline stage".into()));
                    }
                    stages.push(std::mem::take(&mut current));
                }
                Token::Redirect { append } => {
                    let Some(Token::Word(path)) = iter.next() else {
                        return Err(ExecError::InvalidCommand("redirection without a target".into()));
                    };
                    if iter.next().is_some() {
                        return Err(ExecError::InvalidCommand("redirection must end the command".into()));
                    }
                    redirect = Some(Redirect {
                        path: PathBuf::from(path),
                        append,
                    });
                }
            }
        }

        if current.is_empty() {
            return Err(ExecError::InvalidCommand("empty pipeline stage".into()));
        }
        stages.push(current);

        Ok(Self {
            stages,
            redirect,
            elevated: false,
        })
    }

    /// Prefix every stage with `sudo -n`.
    #[must_use]
    pub fn elevate(mut self) -> Self {
        if !self.elevated {
            for stage in &mut self.stages {
                let mut argv: Vec<String> = ELEVATE_PREFIX.iter().map(ToString::to_string).collect();
                argv.append(stage);
                *stage = argv;
            }
            self.elevated = true;
        }
        self
    }

    /// The argv of each pipeline stage.
    #[must_use]
    pub fn stages(&self) -> &[Vec<String>] {
        &self.stages
    }

    /// The trailing redirection, if any.
    #[must_use]
    pub const fn redirect(&self) -> Option<&Redirect> {
        self.redirect.as_ref()
    }

    /// Whether stages run under `sudo`.
    #[must_use]
    pub const fn is_elevated(&self) -> bool {
        self.elevated
    }

    /// The program of the first stage, after any elevation prefix.
    #[must_use]
    pub fn program(&self) -> &str {
        let skip = if self.elevated { ELEVATE_PREFIX.len() } else { 0 };
        self.stages
            .first()
            .and_then(|argv| argv.get(skip))
            .map_or("", String::as_str)
    }
}

/// Renders the line with credentials masked, for logs and error details.
impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, stage) in self.stages.iter().enumerate() {
            if i > 0 {
                f.write_str(" | ")?;
            }
            for (j, word) in stage.iter().enumerate() {
                if j > 0 {
                    f.write_str(" ")?;
                }
                f.write_str(&mask_word(word))?;
            }
        }
        if let Some(redirect) = &self.redirect {
            let op = if redirect.append { ">>" } else { ">" };
            write!(f, " {op} {}", redirect.path.display())?;
        }
        Ok(())
    }
}

fn mask_word(word: &str) -> String {
    if let Some((flag, _)) = word.split_once('=') {
        if flag == "--password" || flag == "-p" {
            return format!("{flag}=****");
        }
    }
    if word.len() > 2 && word.starts_with("-p") && !word.starts_with("--") {
        return "-p****".to_string();
    }
    if let Some(idx) = word.find("IDENTIFIED BY") {
        return format!("{}IDENTIFIED BY ****", &word[..idx]);
    }
    word.to_string()
}

/// Quote `word` so [`CommandLine::parse`] reads it back as one literal word.
///
/// Words made only of safe characters are returned unchanged.
#[must_use]
pub fn quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@,+%".contains(c));
    if safe {
        return word.to_string();
    }
    let mut quoted = String::with_capacity(word.len() + 2);
    quoted.push('\'');
    for c in word.chars() {
        if c == '\'' {
            quoted.push_str("'\\''");
        } else {
            quoted.push(c);
        }
    }
    quoted.push('\'');
    quoted
}

fn tokenize(line: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut word = String::new();
    let mut in_word = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(ch) => word.push(ch),
                        None => {
                            return Err(ExecError::InvalidCommand("unterminated single quote".into()))
                        }
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(ch @ ('"' | '\\')) => word.push(ch),
                            Some(ch) => {
                                word.push('\\');
                                word.push(ch);
                            }
                            None => {
                                return Err(ExecError::InvalidCommand(
                                    "unterminated double quote".into(),
                                ))
                            }
                        },
                        Some(ch) => word.push(ch),
                        None => {
                            return Err(ExecError::InvalidCommand("unterminated double quote".into()))
                        }
                    }
                }
            }
            '\\' => {
                let Some(ch) = chars.next() else {
                    return Err(ExecError::InvalidCommand("trailing backslash".into()));
                };
                in_word = true;
                word.push(ch);
            }
            '|' | '>' => {
                if in_word {
                    tokens.push(Token::Word(std::mem::take(&mut word)));
                    in_word = false;
                }
                if c == '|' {
                    tokens.push(Token::Pipe);
                } else if chars.peek() == Some(&'>') {
                    chars.next();
                    tokens.push(Token::Redirect { append: true });
                } else {
                    tokens.push(Token::Redirect { append: false });
                }
            }
            c if c.is_whitespace() => {
                if in_word {
                    tokens.push(Token::Word(std::mem::take(&mut word)));
                    in_word = false;
                }
            }
            c => {
                in_word = true;
                word.push(c);
            }
        }
    }

    if in_word {
        tokens.push(Token::Word(word));
    }
    Ok(tokens)
}
