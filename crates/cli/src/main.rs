//! corral — infer checked-pointer qualifiers for a legacy C program.
//!
//! The C front end lowers each translation unit to a descriptor file; corral
//! ingests those, builds and links the whole-program constraint system,
//! solves it, and emits the solved qualifier assignment plus the analysis
//! reports. The source rewriter consumes the solution listing.

use std::error::Error;
use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};

use clap::Parser;
use qual_ast::TranslationUnit;
use qual_check::{ConvertOptions, EngineError, ProgramInfo};
use simplelog::{ColorChoice, Config, LevelFilter, TermLogger, TerminalMode};
use smol_str::SmolStr;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Automatically infer checked-pointer annotations for an existing C program \
             (or one already partially converted)"
)]
struct Cli {
    /// Translation-unit descriptor files produced by the front end.
    #[arg(required = true)]
    units: Vec<PathBuf>,

    /// Ancestor directory defining the set of files corral is allowed to
    /// modify. All source files must be under it. Empty means everything
    /// passed in is fair game.
    #[arg(long = "base-dir", default_value = "")]
    base_dir: String,

    /// Directory under which updated files are written at the same relative
    /// paths as the originals under the base dir. Consumed by the rewriter;
    /// the solution listing lands there too.
    #[arg(long = "output-dir")]
    output_dir: Option<PathBuf>,

    /// String inserted into the names of updated files just before the
    /// extension (rewriter knob).
    #[arg(long = "output-postfix", default_value = "-")]
    output_postfix: String,

    /// Consider all checked pointer kinds for conversion, including arrays.
    #[arg(long = "alltypes")]
    alltypes: bool,

    /// Add checked regions (rewriter knob).
    #[arg(long = "addcr")]
    addcr: bool,

    /// Handle variadic functions soundly instead of leaving them unchecked.
    #[arg(long = "handle-varargs")]
    handle_varargs: bool,

    /// Propagate constraints through interop-typed parameters and returns.
    #[arg(long = "enable-itypeprop")]
    enable_itypeprop: bool,

    /// Emit warnings indicating root causes of unchecked pointers.
    #[arg(long = "warn-root-cause")]
    warn_root_cause: bool,

    /// Emit warnings for all root causes, even those unlikely to be
    /// interesting.
    #[arg(long = "warn-all-root-cause")]
    warn_all_root_cause: bool,

    /// Where the constraints document is dumped as JSON.
    #[arg(long = "constraint-output", default_value = "constraint_output.json")]
    constraint_output: PathBuf,

    /// Where the statistics are dumped as JSON.
    #[arg(long = "stats-output", default_value = "TotalConstraintStats.json")]
    stats_output: PathBuf,

    /// Where wild-pointer info grouped by reason is dumped as JSON.
    #[arg(long = "wildptrstats-output", default_value = "WildPtrStats.json")]
    wildptrstats_output: PathBuf,

    /// Where per-wild-pointer info is dumped as JSON.
    #[arg(long = "perptrstats-output", default_value = "PerWildPtrStats.json")]
    perptrstats_output: PathBuf,

    /// Comma-separated names of user-specified allocator functions.
    #[arg(long = "use-malloc", default_value = "", value_name = "NAMES")]
    use_malloc: String,

    /// Dump statistics files.
    #[arg(long = "dump-stats")]
    dump_stats: bool,

    /// Dump intermediate analysis information.
    #[arg(long = "dump-intermediate")]
    dump_intermediate: bool,

    /// Print verbose information.
    #[arg(long, short = 'v')]
    verbose: bool,

    /// Warn instead of erroring when a source file is outside the base dir.
    #[arg(long = "allow-sources-outside-base-dir")]
    allow_sources_outside_base_dir: bool,

    /// Warn instead of erroring on changes to unwritable files (rewriter
    /// knob).
    #[arg(long = "allow-unwritable-changes")]
    allow_unwritable_changes: bool,

    /// Warn instead of erroring when a rewrite fails (rewriter knob).
    #[arg(long = "allow-rewrite-failures")]
    allow_rewrite_failures: bool,

    /// Verify diagnostic output (for automated testing).
    #[arg(long, hide = true)]
    verify: bool,
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let _ = TermLogger::init(
        level,
        Config::default(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    );

    if let Err(e) = run(&cli) {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<(), Box<dyn Error>> {
    let opts = options_from(cli)?;
    let units = load_units(cli, &opts)?;

    // These only steer the rewriting tool, which picks them up alongside the
    // solution listing.
    log::debug!(
        "rewriter knobs: output_postfix={} addcr={} allow_unwritable_changes={} \
         allow_rewrite_failures={} verify={}",
        cli.output_postfix,
        cli.addcr,
        cli.allow_unwritable_changes,
        cli.allow_rewrite_failures,
        cli.verify
    );

    let mut pi = ProgramInfo::new(opts);

    log::debug!("building constraints");
    pi.build_initial_constraints(&units)?;

    log::debug!("linking");
    pi.link()?;

    log::debug!("solving constraints");
    pi.solve_constraints()?;
    pi.compute_interim_constraint_state();

    if cli.dump_intermediate {
        let mut out = BufWriter::new(File::create(&cli.constraint_output)?);
        pi.dump_json(&mut out)?;
    }

    if cli.dump_stats {
        let files: Vec<SmolStr> = units.iter().map(|u| u.path.clone()).collect();
        let mut out = BufWriter::new(File::create(&cli.stats_output)?);
        pi.print_stats(&files, &mut out, false, true)?;
        let mut out = BufWriter::new(File::create(&cli.wildptrstats_output)?);
        pi.dump_wild_ptr_stats(&mut out)?;
        let mut out = BufWriter::new(File::create(&cli.perptrstats_output)?);
        pi.dump_per_ptr_stats(&mut out)?;
        if cli.verbose {
            pi.print_stats(&files, &mut io::stderr().lock(), false, false)?;
        }
    }

    if cli.warn_root_cause || cli.warn_all_root_cause {
        emit_root_cause_warnings(&pi, cli.warn_all_root_cause);
    }

    match &cli.output_dir {
        Some(dir) => {
            fs::create_dir_all(dir)?;
            let mut out = BufWriter::new(File::create(dir.join("solution.txt"))?);
            pi.render_solution(&mut out)?;
        }
        None => {
            pi.render_solution(&mut io::stdout().lock())?;
        }
    }

    Ok(())
}

fn options_from(cli: &Cli) -> Result<ConvertOptions, Box<dyn Error>> {
    if !cli.base_dir.is_empty() && !Path::new(&cli.base_dir).is_dir() {
        return Err(EngineError::Config(format!(
            "base dir {} is not a directory",
            cli.base_dir
        ))
        .into());
    }
    Ok(ConvertOptions {
        base_dir: cli.base_dir.as_str().into(),
        allow_sources_outside_base_dir: cli.allow_sources_outside_base_dir,
        all_types: cli.alltypes,
        handle_varargs: cli.handle_varargs,
        enable_itype_prop: cli.enable_itypeprop,
        verbose: cli.verbose,
        warn_root_cause: cli.warn_root_cause,
        warn_all_root_cause: cli.warn_all_root_cause,
        allocator_functions: split_allocators(&cli.use_malloc),
    })
}

fn split_allocators(list: &str) -> Vec<SmolStr> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(SmolStr::new)
        .collect()
}

fn load_units(cli: &Cli, opts: &ConvertOptions) -> Result<Vec<TranslationUnit>, Box<dyn Error>> {
    let mut units = Vec::with_capacity(cli.units.len());
    for path in &cli.units {
        let text = fs::read_to_string(path)
            .map_err(|e| format!("cannot read {}: {e}", path.display()))?;
        let tu: TranslationUnit = serde_json::from_str(&text)
            .map_err(|e| format!("{} is not a translation-unit descriptor: {e}", path.display()))?;

        if !opts.base_dir.is_empty()
            && !Path::new(tu.path.as_str()).starts_with(opts.base_dir.as_str())
        {
            let err = EngineError::SourceOutsideBaseDir {
                file: tu.path.clone(),
                base_dir: opts.base_dir.clone(),
            };
            if cli.allow_sources_outside_base_dir {
                log::warn!("{err}");
            } else {
                return Err(err.into());
            }
        }
        units.push(tu);
    }
    Ok(units)
}

fn emit_root_cause_warnings(pi: &ProgramInfo, all: bool) {
    let state = pi.constraint_state();
    for (key, info) in &state.root_wild_atoms_with_reason {
        let affected = state.src_w_map.get(key).map_or(0, |group| {
            group
                .iter()
                .filter(|k| state.in_src_non_direct_wild_atoms.contains(k))
                .count()
        });
        // Causes that take down nothing visible in source are usually
        // library noise; only report them on request.
        if !all && affected == 0 && !state.in_src_wild_atoms.contains(key) {
            continue;
        }
        let at = info
            .loc
            .as_ref()
            .map(|p| format!(" at {p}"))
            .unwrap_or_default();
        log::warn!(
            "root cause of {affected} unchecked pointer(s){at}: {}",
            info.reason
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocator_list_splits_on_commas() {
        assert_eq!(
            split_allocators("my_malloc,my_calloc"),
            vec![SmolStr::new("my_malloc"), SmolStr::new("my_calloc")]
        );
        assert_eq!(split_allocators(""), Vec::<SmolStr>::new());
        assert_eq!(
            split_allocators(" a , b ,"),
            vec![SmolStr::new("a"), SmolStr::new("b")]
        );
    }

    #[test]
    fn cli_flags_map_onto_options() {
        let cli = Cli::parse_from([
            "corral",
            "--alltypes",
            "--handle-varargs",
            "--use-malloc",
            "xmalloc",
            "unit.json",
        ]);
        let opts = options_from(&cli).unwrap();
        assert!(opts.all_types);
        assert!(opts.handle_varargs);
        assert!(!opts.enable_itype_prop);
        assert_eq!(opts.allocator_functions, vec![SmolStr::new("xmalloc")]);
    }

    #[test]
    fn invalid_base_dir_is_a_configuration_error() {
        let cli = Cli::parse_from([
            "corral",
            "--base-dir",
            "/definitely/not/a/real/dir",
            "unit.json",
        ]);
        assert!(options_from(&cli).is_err());
    }
}
