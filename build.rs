// ============================================
// WinPrep - build.rs
// ============================================
// This file runs BEFORE the main program is compiled.
// It does two things:
// 1. Compile the Slint UI file (.slint) into Rust code
// 2. Embed version metadata into the EXE (shown in File Properties > Details)
// ============================================

fn main() {
    // Step 1: Compile the main Slint UI file
    // This converts src/ui/main.slint into Rust code that main.rs can use
    // (both the splash window and the main window live in that one file)
    if let Err(e) = slint_build::compile("src/ui/main.slint") {
        eprintln!("============================================");
        eprintln!("ERROR: Failed to compile Slint UI");
        eprintln!("============================================");
        eprintln!("{}", e);
        eprintln!("");
        eprintln!("Make sure src/ui/main.slint exists and has valid syntax.");
        eprintln!("Check the Slint documentation: https://slint.dev/docs/");
        eprintln!("============================================");

        // Exit with error code so the build fails
        std::process::exit(1);
    }

    // Step 2: Embed version resources into the EXE
    // Only runs on Windows targets (skipped on other platforms)
    #[cfg(target_os = "windows")]
    {
        let mut res = winres::WindowsResource::new();
        res.set("ProductName", "WinPrep");
        res.set("FileDescription", "WinPrep - Windows provisioning assistant");
        if let Err(e) = res.compile() {
            eprintln!("Warning: Failed to embed Windows resources: {}", e);
            // Don't fail the build - the app works fine without metadata
        }
    }
}
