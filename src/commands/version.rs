use std::env;

use strum::IntoEnumIterator as _;

use crate::config::BackendKind;

pub fn print_version_info() {
    println!(
        "📦 {} v{} ({})",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        option_env!("GIT_HASH").unwrap_or("unknown revision")
    );
    println!("📝 {}", env!("CARGO_PKG_DESCRIPTION"));
    println!();

    let backends: Vec<String> = BackendKind::iter().map(|b| b.to_string()).collect();
    println!("🗄️  Backends: {}", backends.join(", "));
    println!("🧰 Shared store: redis, in-process");
    println!(
        "💻 Platform: {}/{}",
        env::consts::OS,
        env::consts::ARCH
    );
}
