pub fn print_startup_banner() {
    const RESET: &str = "\x1b[0m";
    const BANNER_COLOR: &str = "\x1b[38;5;173m";
    const DIM_GRAY: &str = "\x1b[2;90m";
    const BANNER: &str = r#"
  _                        _   _ _
 | |_ _   _ _ __ _ __  ___| |_(_) | ___
 | __| | | | '__| '_ \/ __| __| | |/ _ \
 | |_| |_| | |  | | | \__ \ |_| | |  __/
  \__|\__,_|_|  |_| |_|___/\__|_|_|\___|
"#;
    const APP_DESCRIPTION: &str =
        "Round-robin file delivery: one endpoint at a time, one quantum per turn.";
    const LIABILITY_NOTICE: &str =
        "MIT License disclaimer: software is provided \"AS IS\", without warranty or liability.";

    println!("{BANNER_COLOR}{BANNER}{RESET}");
    println!(
        "{} v{} | build {}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        env!("TURNSTILE_BUILD_DATE_UTC")
    );
    println!("{APP_DESCRIPTION}");
    println!("{DIM_GRAY}{LIABILITY_NOTICE}{RESET}");
    println!();
    println!("================================================================");
    println!();
}
