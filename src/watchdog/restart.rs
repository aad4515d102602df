//! Restart decisions
//!
//! After a crash or a hang the supervisor asks a `RestartDecider` whether to
//! launch the application again. Headless deployments use a fixed policy;
//! attended ones prompt on the terminal.

use std::io::{self, BufRead, Write};
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::process::ExitInfo;

/// Yes/no restart confirmation, invoked with the last exit of the child
pub trait RestartDecider: Send + Sync {
    fn confirm_restart(&self, exit: &ExitInfo) -> bool;

    /// Called once the application has produced a fresh heartbeat, so
    /// stateful policies only count consecutive failures.
    fn reset(&self) {}
}

/// Configured restart policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RestartPolicy {
    /// Ask on the terminal
    #[default]
    Prompt,
    /// Always restart after a crash or hang
    Always,
    /// Never restart
    Never,
}

impl std::str::FromStr for RestartPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "prompt" => Ok(RestartPolicy::Prompt),
            "always" => Ok(RestartPolicy::Always),
            "never" => Ok(RestartPolicy::Never),
            other => Err(format!("unknown restart policy: {}", other)),
        }
    }
}

impl RestartPolicy {
    /// Build the decider for this policy, optionally capped at
    /// `max_restarts` consecutive restarts
    pub fn decider(self, max_restarts: Option<u32>) -> Box<dyn RestartDecider> {
        let base: Box<dyn RestartDecider> = match self {
            RestartPolicy::Prompt => Box::new(PromptRestart::stdio()),
            RestartPolicy::Always => Box::new(AlwaysRestart),
            RestartPolicy::Never => Box::new(NeverRestart),
        };
        match max_restarts {
            Some(limit) => Box::new(LimitedRestarts::new(base, limit)),
            None => base,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysRestart;

impl RestartDecider for AlwaysRestart {
    fn confirm_restart(&self, exit: &ExitInfo) -> bool {
        tracing::info!("Restart policy: always (last exit code {})", exit);
        true
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NeverRestart;

impl RestartDecider for NeverRestart {
    fn confirm_restart(&self, exit: &ExitInfo) -> bool {
        tracing::info!("Restart policy: never (last exit code {})", exit);
        false
    }
}

/// Caps consecutive restarts granted by an inner decider
pub struct LimitedRestarts {
    inner: Box<dyn RestartDecider>,
    limit: u32,
    used: AtomicU32,
}

impl LimitedRestarts {
    pub fn new(inner: Box<dyn RestartDecider>, limit: u32) -> Self {
        Self {
            inner,
            limit,
            used: AtomicU32::new(0),
        }
    }

    pub fn restarts_used(&self) -> u32 {
        self.used.load(Ordering::SeqCst)
    }
}

impl RestartDecider for LimitedRestarts {
    fn confirm_restart(&self, exit: &ExitInfo) -> bool {
        if self.used.load(Ordering::SeqCst) >= self.limit {
            tracing::error!(
                "Max restart attempts ({}) exceeded, giving up (last exit code {})",
                self.limit,
                exit
            );
            return false;
        }
        let allowed = self.inner.confirm_restart(exit);
        if allowed {
            let used = self.used.fetch_add(1, Ordering::SeqCst) + 1;
            tracing::info!("Restart attempt {}/{}", used, self.limit);
        }
        allowed
    }

    fn reset(&self) {
        self.used.store(0, Ordering::SeqCst);
        self.inner.reset();
    }
}

/// Interactive confirmation: "DocuSync exited (code N). Restart? [y/N]"
pub struct PromptRestart {
    input: Mutex<Box<dyn BufRead + Send>>,
    output: Mutex<Box<dyn Write + Send>>,
}

impl PromptRestart {
    pub fn new(input: Box<dyn BufRead + Send>, output: Box<dyn Write + Send>) -> Self {
        Self {
            input: Mutex::new(input),
            output: Mutex::new(output),
        }
    }

    /// Prompt on stderr, read the answer from stdin
    pub fn stdio() -> Self {
        Self::new(
            Box::new(io::BufReader::new(io::stdin())),
            Box::new(io::stderr()),
        )
    }

    fn ask(&self, exit: &ExitInfo) -> io::Result<bool> {
        {
            let mut output = self.output.lock();
            write!(output, "DocuSync exited (code {}). Restart? [y/N] ", exit)?;
            output.flush()?;
        }

        let mut answer = String::new();
        self.input.lock().read_line(&mut answer)?;
        Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
    }
}

impl RestartDecider for PromptRestart {
    fn confirm_restart(&self, exit: &ExitInfo) -> bool {
        match self.ask(exit) {
            Ok(true) => true,
            Ok(false) => {
                tracing::info!("User chose not to restart DocuSync.");
                false
            }
            Err(e) => {
                tracing::warn!("Restart prompt failed, not restarting: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn prompt_with(answer: &str) -> (PromptRestart, SharedBuf) {
        let out = SharedBuf::default();
        let prompt = PromptRestart::new(
            Box::new(io::Cursor::new(answer.as_bytes().to_vec())),
            Box::new(out.clone()),
        );
        (prompt, out)
    }

    #[test]
    fn test_prompt_names_exit_code() {
        let (prompt, out) = prompt_with("y\n");
        assert!(prompt.confirm_restart(&ExitInfo::exited(1)));

        let text = String::from_utf8(out.0.lock().clone()).unwrap();
        assert!(text.contains("code 1"), "prompt was {:?}", text);
    }

    #[test]
    fn test_prompt_defaults_to_no() {
        for answer in ["\n", "n\n", "maybe\n", ""] {
            let (prompt, _) = prompt_with(answer);
            assert!(!prompt.confirm_restart(&ExitInfo::exited(1)), "answer {:?}", answer);
        }
        let (prompt, _) = prompt_with("YES\n");
        assert!(prompt.confirm_restart(&ExitInfo::exited(1)));
    }

    #[test]
    fn test_limited_restarts_caps_and_resets() {
        let limited = LimitedRestarts::new(Box::new(AlwaysRestart), 2);
        let exit = ExitInfo::exited(1);

        assert!(limited.confirm_restart(&exit));
        assert!(limited.confirm_restart(&exit));
        assert!(!limited.confirm_restart(&exit));
        assert_eq!(limited.restarts_used(), 2);

        limited.reset();
        assert!(limited.confirm_restart(&exit));
    }

    #[test]
    fn test_limited_restarts_does_not_count_refusals() {
        let limited = LimitedRestarts::new(Box::new(NeverRestart), 1);
        assert!(!limited.confirm_restart(&ExitInfo::exited(1)));
        assert_eq!(limited.restarts_used(), 0);
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!("Always".parse::<RestartPolicy>(), Ok(RestartPolicy::Always));
        assert_eq!("never".parse::<RestartPolicy>(), Ok(RestartPolicy::Never));
        assert_eq!("prompt".parse::<RestartPolicy>(), Ok(RestartPolicy::Prompt));
        assert!("sometimes".parse::<RestartPolicy>().is_err());
        assert_eq!(RestartPolicy::default(), RestartPolicy::Prompt);
    }

    #[test]
    fn test_policy_decider() {
        let exit = ExitInfo::exited(1);
        assert!(RestartPolicy::Always.decider(None).confirm_restart(&exit));
        assert!(!RestartPolicy::Never.decider(None).confirm_restart(&exit));

        let capped = RestartPolicy::Always.decider(Some(1));
        assert!(capped.confirm_restart(&exit));
        assert!(!capped.confirm_restart(&exit));
    }
}
