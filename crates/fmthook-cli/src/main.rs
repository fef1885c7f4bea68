//! `fmthook` — CLI
//!
//! Ici : parsing d'arguments, initialisation (logger, couleur), puis
//! délégation à `fmthook_cli` (lib).

#![forbid(unsafe_code)]

use std::{path::PathBuf, process::ExitCode};

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};

use fmthook_cli as cli;
use fmthook_loader::{HookKind, LaunchMode};

// ──────────────────────────── CLI (clap) ────────────────────────────

#[derive(Debug, Parser)]
#[command(name = "fmthook", version, about = "Exécuter des programmes avec un hook de formatage", long_about = None)]
struct Opt {
    /// Augmente la verbosité (-v, -vv, -vvv)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Mode silencieux
    #[arg(short = 'q', long = "quiet", action = ArgAction::SetTrue, global = true)]
    quiet: bool,

    /// Couleur (si la feature `color` est compilée)
    #[arg(long = "color", value_enum, default_value_t = ColorChoice::Auto, global = true)]
    color: ColorChoice,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ColorChoice {
    Auto,
    Always,
    Never,
}

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum ModeArg {
    /// `install()` recharge le module appelant
    #[default]
    Bootstrap,
    /// Intercepteur installé avant le premier import
    Eager,
}

impl From<ModeArg> for LaunchMode {
    fn from(m: ModeArg) -> Self {
        match m {
            ModeArg::Bootstrap => Self::Bootstrap,
            ModeArg::Eager => Self::Eager,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum HookArg {
    /// "{value} formatted with {spec}"
    Default,
    /// Formatage natif
    Native,
}

impl From<HookArg> for HookKind {
    fn from(h: HookArg) -> Self {
        match h {
            HookArg::Default => Self::Default,
            HookArg::Native => Self::Native,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Exécuter un programme
    Run {
        /// Fichier d'entrée (.fh)
        entry: PathBuf,
        /// Mode de lancement
        #[arg(long, value_enum, default_value_t = ModeArg::Bootstrap)]
        mode: ModeArg,
        /// Hook injecté (sinon celui de la config)
        #[arg(long, value_enum)]
        hook: Option<HookArg>,
        /// Répertoire de recherche supplémentaire (répétable)
        #[arg(short = 'I', long = "include")]
        include: Vec<PathBuf>,
        /// Racine du projet (seule réécrite)
        #[arg(long = "root")]
        project_root: Option<PathBuf>,
        /// Fichier de configuration explicite
        #[arg(long)]
        config: Option<PathBuf>,
        /// Afficher le temps d'exécution
        #[arg(long)]
        time: bool,
    },

    /// Compiler une source en artefact .fhc
    Compile {
        /// Fichier source
        input: PathBuf,
        /// Fichier de sortie (même nom + .fhc si omis)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Écrire sur stdout
        #[arg(long, conflicts_with = "output")]
        stdout: bool,
        /// Réécrire les opérations de formatage
        #[arg(long)]
        rewrite: bool,
        /// Écraser le fichier de sortie
        #[arg(long)]
        overwrite: bool,
        /// Afficher le temps de compilation
        #[arg(long)]
        time: bool,
    },

    /// Désassembler une source ou un artefact
    Disasm {
        /// Source .fh ou artefact .fhc
        input: PathBuf,
        /// Réécrire avant d'afficher
        #[arg(long)]
        rewrite: bool,
        /// Sortie texte (stdout si omis)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

// ──────────────────────────── Initialisation ────────────────────────────

fn init_telemetry(verbose: u8, quiet: bool) {
    #[cfg(feature = "trace")]
    {
        let level = if quiet {
            "error"
        } else {
            match verbose {
                0 => "warn",
                1 => "info",
                2 => "debug",
                _ => "trace",
            }
        };
        std::env::set_var("RUST_LOG", std::env::var("RUST_LOG").unwrap_or_else(|_| level.to_string()));
        cli::init_logger();
    }
    #[cfg(not(feature = "trace"))]
    {
        let _ = (verbose, quiet);
    }
}

fn init_color(choice: ColorChoice) {
    match choice {
        ColorChoice::Auto => {},
        ColorChoice::Always => {
            std::env::set_var("CLICOLOR_FORCE", "1");
            std::env::remove_var("NO_COLOR");
        },
        ColorChoice::Never => {
            std::env::set_var("NO_COLOR", "1");
            std::env::remove_var("CLICOLOR_FORCE");
        },
    }
}

// ──────────────────────────── Main ────────────────────────────

fn main() -> ExitCode {
    match real_main() {
        Ok(code) => ExitCode::from(u8::try_from(code & 0xff).unwrap_or(1)),
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(1)
        },
    }
}

fn real_main() -> Result<i32> {
    let opt = Opt::parse();

    init_color(opt.color);
    init_telemetry(opt.verbose, opt.quiet);

    let command = match opt.cmd {
        Command::Run { entry, mode, hook, include, project_root, config, time } => cli::Command::Run(cli::RunTask {
            entry,
            mode: mode.into(),
            hook: hook.map(Into::into),
            include,
            project_root,
            config,
            time,
        }),
        Command::Compile { input, output, stdout, rewrite, overwrite, time } => {
            let output = match (output, stdout) {
                (_, true) => cli::Output::Stdout,
                (Some(p), false) => cli::Output::Path(p),
                (None, false) => cli::Output::Auto,
            };
            cli::Command::Compile(cli::CompileTask { input, output, rewrite, overwrite, time })
        },
        Command::Disasm { input, rewrite, output } => cli::Command::Disasm(cli::DisasmTask {
            input,
            rewrite,
            output: output.map_or(cli::Output::Stdout, cli::Output::Path),
        }),
    };

    cli::execute(command).context("échec d'exécution de la commande")
}
