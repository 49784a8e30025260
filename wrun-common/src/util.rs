//! Shared utilities for wrun.

const SENSITIVE_KEYS: &[&str] = &[
    "SECRET",
    "PASSWORD",
    "PASSWD",
    "PWD",
    "TOKEN",
    "API_KEY",
    "APIKEY",
    "PRIVATE_KEY",
    "CREDENTIAL",
];

const MASK: &str = "***";

fn is_sensitive_key(key: &str) -> bool {
    let upper = key
        .trim_start_matches(['-', '/'])
        .to_ascii_uppercase()
        .replace('-', "_");
    // PWD alone is the working directory, not a password.
    if upper == "PWD" {
        return false;
    }
    SENSITIVE_KEYS.iter().any(|k| upper.contains(k))
}

fn is_flag(arg: &str) -> bool {
    arg.starts_with("--") || (arg.starts_with('/') && arg.len() > 1 && !arg[1..].contains('/'))
}

/// Mask values of secret-looking arguments before logging.
///
/// Handles `KEY=value`, `--flag=value`, `/flag:value` and a sensitive
/// `--flag` followed by its value as the next argument.
pub fn mask_sensitive_args(args: &[String]) -> Vec<String> {
    let mut masked = Vec::with_capacity(args.len());
    let mut mask_next = false;

    for arg in args {
        if mask_next {
            masked.push(MASK.to_string());
            mask_next = false;
            continue;
        }

        let separator = arg.find(['=', ':']);
        match separator {
            Some(pos) if pos > 0 && is_sensitive_key(&arg[..pos]) => {
                masked.push(format!("{}{}", &arg[..=pos], MASK));
            }
            None if is_flag(arg) && is_sensitive_key(arg) => {
                masked.push(arg.clone());
                mask_next = true;
            }
            _ => masked.push(arg.clone()),
        }
    }

    masked
}

/// Render `executable` and masked `args` as one line for log output.
pub fn mask_command_line(executable: &str, args: &[String]) -> String {
    let mut line = executable.to_string();
    for arg in mask_sensitive_args(args) {
        line.push(' ');
        if arg.contains(char::is_whitespace) {
            line.push('"');
            line.push_str(&arg);
            line.push('"');
        } else {
            line.push_str(&arg);
        }
    }
    line
}
