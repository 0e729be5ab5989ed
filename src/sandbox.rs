//! Process-wide filesystem privilege restriction, applied once at startup
//! before the listener binds. Applying the policy is all-or-nothing: any
//! declaration failure or partial enforcement is fatal, and once applied
//! the policy cannot be loosened for the lifetime of the process.

#[cfg(target_os = "linux")]
pub use linux::{apply, SandboxError, SandboxPolicy};

#[cfg(not(target_os = "linux"))]
pub use fallback::{apply, SandboxError};

#[cfg(target_os = "linux")]
mod linux {
    use std::path::PathBuf;

    use landlock::{
        path_beneath_rules, Access, AccessFs, Ruleset, RulesetAttr, RulesetCreatedAttr,
        RulesetStatus, ABI,
    };
    use nix::libc;

    use crate::Config;

    #[derive(Debug, thiserror::Error)]
    pub enum SandboxError {
        #[error("failed to resolve formatter path '{path}': {source}")]
        ResolveFormatter {
            path: PathBuf,
            source: std::io::Error,
        },
        #[error("prctl(PR_SET_NO_NEW_PRIVS) failed")]
        NoNewPrivs,
        #[error("landlock ruleset error: {0}")]
        Ruleset(#[from] landlock::RulesetError),
        #[error("landlock ruleset was not fully enforced by the kernel")]
        PartialEnforcement,
    }

    /// Filesystem allow-list derived from the configuration: read+execute
    /// beneath the formatter and the standard executable/library trees,
    /// read-only beneath any TLS material. Nothing is writable.
    #[derive(Debug)]
    pub struct SandboxPolicy {
        pub exec_paths: Vec<PathBuf>,
        pub read_paths: Vec<PathBuf>,
    }

    impl SandboxPolicy {
        pub fn for_config(config: &Config) -> Result<Self, SandboxError> {
            let mut exec_paths: Vec<PathBuf> = ["/usr", "/lib", "/lib64", "/bin"]
                .into_iter()
                .map(PathBuf::from)
                .filter(|p| p.exists())
                .collect();

            // A bare command name resolves through PATH inside the trees
            // above; an explicit path must resolve now so the rule pins
            // the real file, not a symlink.
            if config.formatter_path.components().count() > 1 {
                let resolved = config.formatter_path.canonicalize().map_err(|source| {
                    SandboxError::ResolveFormatter {
                        path: config.formatter_path.clone(),
                        source,
                    }
                })?;
                exec_paths.push(resolved);
            }

            // The dynamic loader reads /etc/ld.so.cache, and formatters
            // may consult locale or nsswitch data there.
            let mut read_paths: Vec<PathBuf> = ["/etc"]
                .into_iter()
                .map(PathBuf::from)
                .filter(|p| p.exists())
                .collect();
            read_paths.extend(
                [&config.tls_cert_path, &config.tls_key_path]
                    .into_iter()
                    .flatten()
                    .cloned(),
            );

            Ok(Self {
                exec_paths,
                read_paths,
            })
        }

        pub fn apply(&self) -> Result<(), SandboxError> {
            // Required before Landlock can restrict the process.
            // Safety: prctl with PR_SET_NO_NEW_PRIVS is a simple flag set.
            let ret = unsafe { libc::prctl(libc::PR_SET_NO_NEW_PRIVS, 1, 0, 0, 0) };
            if ret != 0 {
                return Err(SandboxError::NoNewPrivs);
            }

            let exec_access = AccessFs::Execute | AccessFs::ReadFile | AccessFs::ReadDir;
            let read_access = AccessFs::ReadFile | AccessFs::ReadDir;

            let status = Ruleset::default()
                .handle_access(AccessFs::from_all(ABI::V3))?
                .create()?
                .add_rules(path_beneath_rules(&self.exec_paths, exec_access))?
                .add_rules(path_beneath_rules(&self.read_paths, read_access))?
                .restrict_self()?;

            if status.ruleset != RulesetStatus::FullyEnforced {
                return Err(SandboxError::PartialEnforcement);
            }

            tracing::info!(
                exec = ?self.exec_paths,
                read = ?self.read_paths,
                "landlock sandbox applied"
            );
            Ok(())
        }
    }

    /// Builds and applies the policy for the given configuration.
    pub fn apply(config: &Config) -> Result<(), SandboxError> {
        SandboxPolicy::for_config(config)?.apply()
    }

}

#[cfg(not(target_os = "linux"))]
mod fallback {
    use crate::Config;

    #[derive(Debug, thiserror::Error)]
    pub enum SandboxError {
        #[error("sandboxing is not supported on this platform")]
        Unsupported,
    }

    pub fn apply(_config: &Config) -> Result<(), SandboxError> {
        tracing::warn!("landlock is unavailable on this platform; running unsandboxed");
        Ok(())
    }
}
