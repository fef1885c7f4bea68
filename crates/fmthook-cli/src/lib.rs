//! fmthook-cli — bibliothèque interne du binaire `fmthook`
//!
//! `main.rs` ne fait que parser les arguments ; tout le reste (lecture,
//! compilation, réécriture, lancement, écriture atomique) vit ici et se teste
//! sans processus.
//!
//! - `run`     : lance un programme (`bootstrap` ou `eager`)
//! - `compile` : source → artefact `.fhc` (inspection, jamais relu par le chargeur)
//! - `disasm`  : source ou `.fhc` → listing texte

#![deny(unused_must_use)]
#![forbid(unsafe_code)]

use std::{
    fs,
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
    rc::Rc,
    time::Instant,
};

use anyhow::{bail, Context, Result};
use fmthook_core::{bytecode::Chunk, disasm::disassemble_full};
use fmthook_loader::{HookKind, LaunchMode, Launcher, LoaderConfig};
use fmthook_rewrite::Rewriter;
use fmthook_vm::Vm;
use log::debug;

#[cfg(feature = "color")]
use owo_colors::OwoColorize;

/// Extension des artefacts compilés.
pub const ARTIFACT_EXT: &str = "fhc";

// ───────────────────────────── Types publics ─────────────────────────────

/// Commande haut-niveau (le parsing CLI reste dans main.rs).
#[derive(Clone, Debug)]
pub enum Command {
    /// Exécute un programme.
    Run(RunTask),
    /// Compile une source en artefact.
    Compile(CompileTask),
    /// Désassemble une source ou un artefact.
    Disasm(DisasmTask),
}

/// `fmthook run`.
#[derive(Clone, Debug, Default)]
pub struct RunTask {
    /// Fichier d'entrée.
    pub entry: PathBuf,
    /// Mode de lancement.
    pub mode: LaunchMode,
    /// Hook imposé (sinon celui de la config).
    pub hook: Option<HookKind>,
    /// Répertoires de recherche ajoutés (`-I`).
    pub include: Vec<PathBuf>,
    /// Racine du projet imposée.
    pub project_root: Option<PathBuf>,
    /// Fichier de config explicite (sinon recherche ascendante).
    pub config: Option<PathBuf>,
    /// Afficher le temps d'exécution.
    pub time: bool,
}

/// `fmthook compile`.
#[derive(Clone, Debug, Default)]
pub struct CompileTask {
    /// Source.
    pub input: PathBuf,
    /// Destination.
    pub output: Output,
    /// Appliquer la réécriture avant encodage.
    pub rewrite: bool,
    /// Autoriser l'écrasement.
    pub overwrite: bool,
    /// Afficher le temps de compilation.
    pub time: bool,
}

/// `fmthook disasm`.
#[derive(Clone, Debug, Default)]
pub struct DisasmTask {
    /// Source `.fh` ou artefact `.fhc`.
    pub input: PathBuf,
    /// Réécrire avant d'afficher.
    pub rewrite: bool,
    /// Destination du listing.
    pub output: Output,
}

/// Sortie générique.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Output {
    /// Fichier.
    Path(PathBuf),
    /// Sortie standard.
    #[default]
    Stdout,
    /// Même nom que l'entrée, extension [`ARTIFACT_EXT`].
    Auto,
}

// ───────────────────────────── Initialisation ─────────────────────────────

/// Initialise le logger (`RUST_LOG`, `warn` par défaut) selon la feature `trace`.
pub fn init_logger() {
    #[cfg(feature = "trace")]
    {
        let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
            .format_timestamp_secs()
            .try_init();
    }
}

// ───────────────────────────── Exécution ─────────────────────────────

/// Exécute une commande. Retourne un code de sortie.
pub fn execute(cmd: Command) -> Result<i32> {
    match cmd {
        Command::Run(t) => run_entry(&t),
        Command::Compile(t) => compile_entry(&t).map(|()| 0),
        Command::Disasm(t) => disasm_entry(&t).map(|()| 0),
    }
}

/// Configuration effective d'un `run` : fichier, environnement, puis options.
pub fn resolve_config(task: &RunTask) -> Result<LoaderConfig> {
    let mut cfg = match &task.config {
        Some(p) => LoaderConfig::load(p).with_context(|| format!("config {}", display(p)))?,
        None => LoaderConfig::discover(&entry_dir(&task.entry))?,
    }
    .with_env_paths();
    if let Some(root) = &task.project_root {
        cfg.project_root.clone_from(root);
    }
    cfg.search_paths.extend(task.include.iter().cloned());
    if let Some(hook) = task.hook {
        cfg.hook = hook;
    }
    debug!("loader config: {cfg:?}");
    Ok(cfg)
}

fn run_entry(task: &RunTask) -> Result<i32> {
    if !task.entry.is_file() {
        bail!("fichier d'entrée introuvable : {}", display(&task.entry));
    }
    let cfg = resolve_config(task)?;
    let mut vm = Vm::new();

    let start = Instant::now();
    let launch = Launcher::new(cfg)
        .mode(task.mode)
        .run(&mut vm, &task.entry)
        .with_context(|| format!("exécution de {}", display(&task.entry)))?;
    let elapsed = start.elapsed();

    if task.time {
        status_info("TIME", &format!("run: {} ms ({})", elapsed.as_millis(), launch.context.state()));
    }
    Ok(launch.exit_code)
}

/// Compile (et réécrit si demandé) une source.
pub fn compile_file(path: &Path, rewrite: bool) -> Result<Chunk> {
    let src = fs::read_to_string(path).with_context(|| format!("lecture de {}", display(path)))?;
    let chunk = fmthook_compiler::compile_source(&src, Some(&display(path)))
        .with_context(|| format!("compilation de {}", display(path)))?;
    if !rewrite {
        return Ok(chunk);
    }
    let mut rw = Rewriter::default();
    let out = rw.rewrite_chunk(&Rc::new(chunk)).context("réécriture")?;
    status_info("REWRITE", &rw.stats().to_string());
    Ok(Rc::unwrap_or_clone(out))
}

/// Charge une source (compilée) ou un artefact `.fhc`.
pub fn load_chunk(path: &Path, rewrite: bool) -> Result<Chunk> {
    if path.extension().and_then(|e| e.to_str()) != Some(ARTIFACT_EXT) {
        return compile_file(path, rewrite);
    }
    let bytes = fs::read(path).with_context(|| format!("lecture artefact: {}", display(path)))?;
    let chunk = Chunk::from_bytes(&bytes).with_context(|| format!("artefact invalide: {}", display(path)))?;
    if !rewrite {
        return Ok(chunk);
    }
    Ok(fmthook_rewrite::rewrite(&chunk)?)
}

fn compile_entry(task: &CompileTask) -> Result<()> {
    let start = Instant::now();
    let chunk = compile_file(&task.input, task.rewrite)?;
    let bytes = chunk.to_bytes();
    let elapsed = start.elapsed();

    let out_path = match &task.output {
        Output::Stdout => {
            let mut w = BufWriter::new(io::stdout().lock());
            w.write_all(&bytes)?;
            w.flush()?;
            None
        }
        Output::Path(p) => Some(p.clone()),
        Output::Auto => Some(default_artifact_path(&task.input)),
    };
    if let Some(out_path) = out_path {
        if out_path.exists() && !task.overwrite {
            bail!("fichier de sortie existe déjà: {}", display(&out_path));
        }
        write_bytes_atomic(&out_path, &bytes).with_context(|| format!("écriture de {}", display(&out_path)))?;
        status_ok("COMPILE", &display(&out_path));
    }

    if task.time {
        status_info("TIME", &format!("compile: {} ms", elapsed.as_millis()));
    }
    Ok(())
}

fn disasm_entry(task: &DisasmTask) -> Result<()> {
    let chunk = load_chunk(&task.input, task.rewrite)?;
    let text = disassemble_full(&chunk, &display(&task.input));
    match &task.output {
        Output::Stdout => {
            let mut w = BufWriter::new(io::stdout().lock());
            w.write_all(text.as_bytes())?;
            w.flush()?;
        }
        Output::Path(p) => write_bytes_atomic(p, text.as_bytes())?,
        Output::Auto => bail!("Output::Auto n'est pas valide pour disasm"),
    }
    Ok(())
}

// ───────────────────────────── Utilitaires E/S ─────────────────────────────

/// Écrit dans un fichier temporaire voisin puis renomme.
fn write_bytes_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."));
    let base = path.file_name().context("chemin de sortie sans nom de fichier")?;
    let tmp = unique_tmp_path(dir, base);
    {
        let mut w = BufWriter::new(fs::File::create(&tmp)?);
        w.write_all(bytes)?;
        w.flush()?;
    }
    if path.exists() {
        // Windows : Rename sur cible existante peut échouer
        let _ = fs::remove_file(path);
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

fn unique_tmp_path(dir: &Path, base: &std::ffi::OsStr) -> PathBuf {
    let mut i = 0u32;
    loop {
        let candidate = dir.join(format!("{}.tmp{i}", base.to_string_lossy()));
        if !candidate.exists() {
            return candidate;
        }
        i = i.wrapping_add(1);
    }
}

/// `dir/main.fh` → `dir/main.fhc`.
pub fn default_artifact_path(src: &Path) -> PathBuf { src.with_extension(ARTIFACT_EXT) }

fn entry_dir(entry: &Path) -> PathBuf {
    match entry.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn display(p: &Path) -> String { p.to_string_lossy().to_string() }

// ───────────────────────────── Sorties jolies ─────────────────────────────

fn status_ok(tag: &str, msg: &str) {
    #[cfg(feature = "color")]
    {
        eprintln!("{} {}", tag.green().bold(), msg);
    }
    #[cfg(not(feature = "color"))]
    {
        eprintln!("{tag} {msg}");
    }
}

fn status_info(tag: &str, msg: &str) {
    #[cfg(feature = "color")]
    {
        eprintln!("{} {}", tag.blue().bold(), msg);
    }
    #[cfg(not(feature = "color"))]
    {
        eprintln!("{tag} {msg}");
    }
}

// ───────────────────────────── Tests ─────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use fmthook_core::bytecode::Opcode;
    use pretty_assertions::assert_eq;

    #[test]
    fn default_paths() {
        assert_eq!(default_artifact_path(Path::new("src/main.fh")), PathBuf::from("src/main.fhc"));
        assert_eq!(entry_dir(Path::new("main.fh")), PathBuf::from("."));
        assert_eq!(entry_dir(Path::new("app/main.fh")), PathBuf::from("app"));
    }

    #[test]
    fn compile_then_disasm_an_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("main.fh");
        fs::write(&src, "let x = 5;\nprint(f\"{x:>3}\");\n").unwrap();

        let task = CompileTask { input: src.clone(), output: Output::Auto, rewrite: true, ..CompileTask::default() };
        assert_eq!(execute(Command::Compile(task.clone())).unwrap(), 0);
        let artifact = dir.path().join("main.fhc");
        let chunk = load_chunk(&artifact, false).unwrap();
        assert!(chunk.flags().rewritten);
        assert!(chunk.ops.iter().any(|op| op.code == Opcode::Rot3));

        assert!(execute(Command::Compile(task)).is_err(), "pas d'écrasement sans --overwrite");

        let listing = dir.path().join("main.txt");
        let task = DisasmTask { input: artifact, rewrite: false, output: Output::Path(listing.clone()) };
        execute(Command::Disasm(task)).unwrap();
        assert!(fs::read_to_string(listing).unwrap().contains("ROT_THREE"));
    }

    #[test]
    fn run_options_override_the_config_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(".fmthook.toml"), "hook = \"native\"\nsearch_paths = [\"lib\"]\n").unwrap();
        let entry = dir.path().join("main.fh");
        fs::write(&entry, "install();\n").unwrap();

        let task = RunTask { entry: entry.clone(), include: vec![PathBuf::from("/extra")], ..RunTask::default() };
        let cfg = resolve_config(&task).unwrap();
        assert_eq!(cfg.hook, HookKind::Native);
        assert!(cfg.search_paths.starts_with(&[dir.path().join("lib")]));
        assert_eq!(cfg.search_paths.last(), Some(&PathBuf::from("/extra")));

        let task = RunTask { entry, hook: Some(HookKind::Default), ..RunTask::default() };
        assert_eq!(resolve_config(&task).unwrap().hook, HookKind::Default);
        assert_eq!(execute(Command::Run(task)).unwrap(), 0);
    }

    #[test]
    fn missing_entry_is_reported() {
        let task = RunTask { entry: PathBuf::from("/definitely/not/here.fh"), ..RunTask::default() };
        assert!(execute(Command::Run(task)).is_err());
    }
}
