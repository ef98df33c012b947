//! `cs sandbox create` command construction.
//!
//! The same argv feeds both the real invocation and the dry-run preview, so
//! what is printed is exactly what would run.

use crate::env::EnvVarSet;

/// Sandbox CLI binary.
pub const CS_BIN: &str = "cs";

/// Namespace prefix for environment definitions passed with `-D`.
const ENV_NAMESPACE: &str = "claude/env";

/// Argument vector for `cs`, excluding the binary itself.
///
/// Environment variables become one `-D claude/env[KEY]=VALUE` pair per key,
/// in ascending key order.
pub fn create_command_args(
    name: &str,
    template: &str,
    pool: Option<&str>,
    env: &EnvVarSet,
) -> Vec<String> {
    let mut args = vec![
        "sandbox".to_string(),
        "create".to_string(),
        name.to_string(),
        "-t".to_string(),
        template.to_string(),
    ];

    if let Some(pool) = pool.filter(|p| !p.is_empty()) {
        args.push("--pool".to_string());
        args.push(pool.to_string());
    }

    for (key, value) in env.iter() {
        args.push("-D".to_string());
        args.push(format!("{ENV_NAMESPACE}[{key}]={value}"));
    }

    args
}

/// Render the create invocation as a shell command line.
///
/// Identical logical inputs always produce byte-identical output.
pub fn build_create_command(
    name: &str,
    template: &str,
    pool: Option<&str>,
    env: &EnvVarSet,
) -> String {
    let mut line = String::from(CS_BIN);
    for arg in create_command_args(name, template, pool, env) {
        line.push(' ');
        line.push_str(&shell_quote(&arg));
    }
    line
}

/// Quote `s` for a POSIX shell. Strings made only of safe characters are
/// returned as-is; anything else is single-quoted with `'` escaped as `'\''`.
pub fn shell_quote(s: &str) -> String {
    let safe = !s.is_empty()
        && s.chars().all(|c| {
            c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/' | ':' | '@' | '%' | '+' | ',' | '=')
        });
    if safe {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', r"'\''"))
}
