use clap_complete::{generate, Shell};

/// Write a completion script for `shell` to stdout, with install hints on
/// stderr.
pub fn run(shell: &str, mut cmd: clap::Command) -> anyhow::Result<()> {
    let shell = match shell.to_lowercase().as_str() {
        "bash" => Shell::Bash,
        "zsh" => Shell::Zsh,
        "fish" => Shell::Fish,
        "powershell" | "ps" => Shell::PowerShell,
        "elvish" => Shell::Elvish,
        _ => {
            anyhow::bail!(
                "Unsupported shell: {}. Options: bash, zsh, fish, powershell, elvish",
                shell
            );
        }
    };

    generate(shell, &mut cmd, "browsermux", &mut std::io::stdout());

    eprintln!();
    eprintln!("# Usage:");
    match shell {
        Shell::Bash => {
            eprintln!("#   browsermux completions bash > ~/.local/share/bash-completion/completions/browsermux");
            eprintln!("#   or: eval \"$(browsermux completions bash)\"");
        }
        Shell::Zsh => {
            eprintln!("#   browsermux completions zsh > ~/.zfunc/_browsermux");
            eprintln!("#   Make sure fpath includes ~/.zfunc and run compinit");
        }
        Shell::Fish => {
            eprintln!("#   browsermux completions fish > ~/.config/fish/completions/browsermux.fish");
        }
        _ => {}
    }

    Ok(())
}
