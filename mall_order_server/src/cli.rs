use std::{env, env::VarError};

/// The server takes no arguments. Passing any prints the help text and the current configuration instead.
pub fn handle_command_line_args() -> bool {
    let has_cli_args = env::args().count() > 1;
    if has_cli_args {
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
    // Secrets stay off this list
    const DISPLAY_ENVS: [&str; 16] = [
        "RUST_LOG",
        "MALL_HOST",
        "MALL_PORT",
        "MALL_DATABASE_URL",
        "MALL_PAYMENT_TIMEOUT",
        "MALL_TIMEOUT_SWEEP_INTERVAL",
        "MALL_REFUND_MAX_RETRIES",
        "MALL_REFUND_RETRY_DELAY_MS",
        "MALL_RESERVE_MAX_ATTEMPTS",
        "MALL_PLATFORM_STORE_ID",
        "MALL_EVENT_BUFFER_SIZE",
        "MALL_ALIPAY_ENABLED",
        "MALL_ALIPAY_APP_ID",
        "MALL_ALIPAY_GATEWAY_URL",
        "MALL_ALIPAY_NOTIFY_URL",
        "MALL_ALIPAY_RETURN_URL",
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
