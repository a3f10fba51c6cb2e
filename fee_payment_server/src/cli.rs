use std::{env, env::VarError};

/// There's no real CLI for the server, so just do quick 'n dirty
pub fn handle_command_line_args() -> bool {
    let has_cli_args = env::args().count() > 1;
    if has_cli_args {
        // We don't expect any CLI args, so always print the help
        display_readme();
        display_envs();
    }
    has_cli_args
}

fn display_readme() {
    const README: &str = include_str!("./cli-help.txt");
    println!("\n{README}\n");
}

fn display_envs() {
    // Be explicit about which envars to print, so as to avoid accidentally exposing secrets
    const DISPLAY_ENVS: [&str; 17] = [
        "RUST_LOG",
        "FPG_HOST",
        "FPG_PORT",
        "FPG_DATABASE_URL",
        "FPG_CURRENCY",
        "FPG_ACK_TIMEOUT_MS",
        "FPG_STRICT_VALIDATION",
        "FPG_PROVIDER_UTC_OFFSET_HOURS",
        "FPG_REFERENCE_PREFIXES",
        "FPG_AUTO_APPLY_CREDIT",
        "FPG_RETRY_INTERVAL_SECS",
        "FPG_RETRY_MIN_AGE_SECS",
        "FPG_NOTIFY_MAX_ATTEMPTS",
        "FPG_NOTIFY_BASE_DELAY_MS",
        "FPG_SCHOOL_NAME",
        "FPG_SMS_GATEWAY_URL",
        "FPG_SMS_SENDER_ID",
    ];

    println!("Current environment values (EXCLUDING variables that contain secrets):");
    DISPLAY_ENVS.iter().for_each(|&name| {
        let val = match env::var(name) {
            Ok(s) => s,
            Err(VarError::NotPresent) => "Not set".into(),
            Err(VarError::NotUnicode(s)) => format!("Invalid value: {}", s.to_string_lossy()),
        };
        println!("  {name:<35} {val:<15}");
    })
}
