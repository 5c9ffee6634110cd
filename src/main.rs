//! pyrefactor - LLM-assisted Python refactoring assistant
//!
//! Commands:
//! - analyze-file: structure, metrics and an LLM review of one file
//! - analyze: metrics, design patterns and suggestions for a file or tree
//! - patterns / pattern-guide / pattern-diagram: the design pattern knowledge base
//! - refactor: suggest, generate, preview and apply a refactoring
//! - suggestions: list or remove stored suggestions
//! - analyze-api / api-patterns: web API endpoints, models and REST design
//! - analyze-performance / generate-docs / api-security / backups

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use pyrefactor::api::{self, ApiAnalyzer, ApiPatternGuide};
use pyrefactor::changes::{CodeChange, CodeChangeManager};
use pyrefactor::config::{load_config, AssistantConfig};
use pyrefactor::docs::{ConsistencyChecker, DocGenerator};
use pyrefactor::engine::{analyze_source, store_llm_suggestions, validate_python, RefactoringEngine};
use pyrefactor::interact::{confirm, prompt_line};
use pyrefactor::llm::prompts::TemplateManager;
use pyrefactor::llm::{CompletionProvider, LlmClient};
use pyrefactor::metrics::metrics_of;
use pyrefactor::parser::ParsedSource;
use pyrefactor::patterns::PatternDetector;
use pyrefactor::perf::{self, PerformanceAnalyzer, PerformanceOptimizer};
use pyrefactor::registry::{
    render_comparison, render_details, render_diagram, render_guide, PatternCategory, PatternsRegistry,
};
use pyrefactor::reporter::{file_analysis_markdown, generate_report, FileAnalysisResult};
use pyrefactor::scanner::{collect_python_files, is_python_file, read_source, write_file_checked};
use pyrefactor::security::{self, Framework, SecurityScanner};
use pyrefactor::suggestions::{RefactoringSuggestion, Severity, SuggestionGenerator, SuggestionStore};

/// Files reviewed by the model during `api-security --llm`.
const SECURITY_REVIEW_FILES: usize = 3;

#[derive(Parser, Debug)]
#[command(name = "pyrefactor")]
#[command(about = "LLM-assisted analysis and refactoring of Python code")]
struct Args {
    /// Project root; relative paths are looked up here
    #[arg(long, global = true, default_value = ".")]
    project: PathBuf,

    /// API key for the LLM provider
    #[arg(long, global = true, env = "LLM_API_KEY", hide_env_values = true)]
    llm_api_key: Option<String>,

    /// LLM provider (gemini, openai, anthropic)
    #[arg(long, global = true)]
    llm_provider: Option<String>,

    /// Configuration file (YAML or JSON)
    #[arg(long, global = true, default_value = "config.json")]
    config: PathBuf,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Analyze one file with the LLM and write a markdown report
    AnalyzeFile {
        /// Python file
        file: PathBuf,

        /// Report path (default: <stem>-analysis.md next to the file)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Metrics, design patterns and suggestions for a file or directory
    Analyze {
        /// Python file or directory
        path: PathBuf,

        /// Skip complexity metrics
        #[arg(long)]
        no_metrics: bool,

        /// Skip design pattern detection
        #[arg(long)]
        no_patterns: bool,

        /// Skip refactoring suggestions
        #[arg(long)]
        no_suggestions: bool,

        /// Output format (console, markdown, json)
        #[arg(short, long, default_value = "console")]
        format: String,
    },

    /// Browse the design pattern knowledge base
    Patterns {
        /// Show full details for every pattern
        #[arg(long)]
        detail: bool,

        /// Compare patterns side by side
        #[arg(long)]
        compare: bool,

        /// Show one pattern by key or name
        #[arg(long)]
        pattern: Option<String>,
    },

    /// Which design pattern solves which problem
    PatternGuide,

    /// Structure diagram and call flow of one design pattern
    PatternDiagram {
        /// Pattern key or name
        pattern: String,
    },

    /// Suggest refactorings for a file and optionally apply one
    Refactor {
        /// Python file
        file: PathBuf,

        /// Only use local rules for suggestions. Code generation needs the
        /// LLM, so this cannot be combined with --apply
        #[arg(long)]
        no_llm: bool,

        /// Do not back up the file before an in-place write
        #[arg(long)]
        no_backup: bool,

        /// Do not print the diff before applying
        #[arg(long)]
        no_preview: bool,

        /// Pick a suggestion and apply it
        #[arg(long)]
        apply: bool,

        /// Suggestion id to apply (asked interactively when omitted)
        #[arg(long)]
        id: Option<u32>,

        /// Overwrite the file instead of writing <stem>_<kind>.py next to it
        #[arg(long)]
        in_place: bool,

        /// Apply without asking for confirmation
        #[arg(short, long)]
        yes: bool,

        /// Create and check out this git branch before writing
        #[arg(long)]
        branch: Option<String>,

        /// Commit the written file with this message
        #[arg(long)]
        commit: Option<String>,
    },

    /// List or remove stored suggestions
    Suggestions {
        /// Only suggestions for this file
        #[arg(long)]
        file: Option<PathBuf>,

        /// Only suggestions not applied yet
        #[arg(long)]
        pending: bool,

        /// Remove the suggestion with this id
        #[arg(long)]
        remove: Option<u32>,
    },

    /// Look for slow constructs in a file
    AnalyzePerformance {
        /// Python file
        file: PathBuf,

        /// Write the markdown report here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Write an optimized copy of the file
        #[arg(long)]
        optimize: bool,
    },

    /// Generate markdown API documentation
    GenerateDocs {
        /// Python file or package directory
        path: PathBuf,

        /// Output directory (relative to the project)
        #[arg(long, default_value = "docs")]
        output_dir: PathBuf,

        /// Skip the docstring consistency check
        #[arg(long)]
        no_consistency: bool,
    },

    /// Extract web API endpoints and models and review the REST design
    AnalyzeApi {
        /// Project directory or file
        path: PathBuf,

        /// Framework (django, flask, fastapi); detected when omitted
        #[arg(long)]
        framework: Option<String>,

        /// Only list the endpoints
        #[arg(long)]
        endpoints_only: bool,

        /// Also run the security scan
        #[arg(long)]
        security: bool,

        /// Write the markdown report here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// REST API design patterns and best practices
    ApiPatterns {
        /// Show one pattern with an example
        #[arg(long)]
        pattern: Option<String>,
    },

    /// Scan a web API project for security issues
    ApiSecurity {
        /// Project directory
        path: PathBuf,

        /// Write the markdown report here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Ask the LLM to review the riskiest files
        #[arg(long)]
        llm: bool,

        /// Leave out the recommendations section
        #[arg(long)]
        compact: bool,
    },

    /// List backups or restore one
    Backups {
        /// Backup directory (name or path) to restore
        #[arg(long)]
        restore: Option<PathBuf>,
    },
}

/// Resolved project and configuration shared by the commands.
struct App {
    project: PathBuf,
    config: AssistantConfig,
}

impl App {
    /// Paths that exist as given are used as-is; anything else is looked up
    /// under the project root.
    fn target(&self, path: &Path) -> PathBuf {
        if path.is_absolute() || path.exists() {
            path.to_path_buf()
        } else {
            self.project.join(path)
        }
    }

    fn llm(&self) -> Result<LlmClient> {
        LlmClient::from_config(&self.config).context("Failed to create LLM client")
    }

    fn templates(&self) -> TemplateManager {
        let dir = self.config.resolve(&self.project, &self.config.templates_dir);
        TemplateManager::load(&dir).unwrap_or_else(|err| {
            warn!("Failed to load prompt templates from {}: {err:#}", dir.display());
            TemplateManager::builtin()
        })
    }

    fn skip_dirs(&self) -> Vec<PathBuf> {
        self.config.scan_skip_dirs(&self.project)
    }

    fn store(&self) -> SuggestionStore {
        SuggestionStore::load(&self.config.resolve(&self.project, &self.config.suggestions_file))
    }

    fn change_manager(&self) -> CodeChangeManager {
        CodeChangeManager::new(
            &self.project,
            &self.config.resolve(&self.project, &self.config.backup_dir),
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if !args.project.is_dir() {
        bail!("Project directory does not exist: {}", args.project.display());
    }

    let config_path = if args.config.exists() {
        args.config.clone()
    } else {
        args.project.join(&args.config)
    };
    let (mut config, config_error) = match load_config(Some(&config_path)) {
        Ok(config) => (config, None),
        Err(err) => (AssistantConfig::default(), Some(err)),
    };
    config.apply_overrides(args.llm_api_key.as_deref(), args.llm_provider.as_deref());
    init_logging(args.verbose, &config.log_level);
    match config_error {
        Some(err) => warn!("{err:#}, using defaults"),
        None if config_path.exists() => debug!("Loaded configuration from {}", config_path.display()),
        None => debug!("No configuration file found, using defaults"),
    }

    let app = App {
        project: args.project,
        config,
    };

    match args.command {
        Commands::AnalyzeFile { file, output } => run_analyze_file(&app, &file, output).await?,
        Commands::Analyze {
            path,
            no_metrics,
            no_patterns,
            no_suggestions,
            format,
        } => run_analyze(&app, &path, !no_metrics, !no_patterns, !no_suggestions, &format)?,
        Commands::Patterns {
            detail,
            compare,
            pattern,
        } => run_patterns(detail, compare, pattern.as_deref())?,
        Commands::PatternGuide => run_pattern_guide()?,
        Commands::PatternDiagram { pattern } => run_pattern_diagram(&pattern)?,
        Commands::Refactor {
            file,
            no_llm,
            no_backup,
            no_preview,
            apply,
            id,
            in_place,
            yes,
            branch,
            commit,
        } => {
            let options = RefactorOptions {
                use_llm: !no_llm,
                backup: !no_backup,
                preview: !no_preview,
                apply,
                id,
                in_place,
                assume_yes: yes,
                branch,
                commit,
            };
            run_refactor(&app, &file, options).await?
        }
        Commands::Suggestions {
            file,
            pending,
            remove,
        } => run_suggestions(&app, file.as_deref(), pending, remove)?,
        Commands::AnalyzePerformance {
            file,
            output,
            optimize,
        } => run_analyze_performance(&app, &file, output.as_deref(), optimize).await?,
        Commands::GenerateDocs {
            path,
            output_dir,
            no_consistency,
        } => run_generate_docs(&app, &path, &output_dir, !no_consistency)?,
        Commands::AnalyzeApi {
            path,
            framework,
            endpoints_only,
            security,
            output,
        } => run_analyze_api(&app, &path, framework.as_deref(), endpoints_only, security, output.as_deref())?,
        Commands::ApiPatterns { pattern } => run_api_patterns(pattern.as_deref())?,
        Commands::ApiSecurity {
            path,
            output,
            llm,
            compact,
        } => run_api_security(&app, &path, output.as_deref(), llm, compact).await?,
        Commands::Backups { restore } => run_backups(&app, restore.as_deref())?,
    }

    Ok(())
}

/// Logs go to stderr so reports on stdout stay clean. `RUST_LOG` wins over
/// `-v` and the configured level.
fn init_logging(verbose: bool, level: &str) {
    let default_level = if verbose { "debug" } else { level };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn severity_icon(severity: Severity) -> &'static str {
    match severity {
        Severity::High => "🔴",
        Severity::Medium => "🟠",
        Severity::Low => "🟢",
    }
}

fn print_suggestion(suggestion: &RefactoringSuggestion) {
    let applied = if suggestion.applied { " ✅ applied" } else { "" };
    println!(
        "  [{}] {} {} ({}) at {}{applied}",
        suggestion.id,
        severity_icon(suggestion.severity),
        suggestion.kind,
        suggestion.severity,
        suggestion.location
    );
    println!("      {}", suggestion.description);
    if !suggestion.recommendation.is_empty() {
        println!("      → {}", suggestion.recommendation);
    }
}

async fn run_analyze_file(app: &App, file: &Path, output: Option<PathBuf>) -> Result<()> {
    let file = app.target(file);
    println!("🔍 Analyzing {}\n", file.display());

    let source = read_source(&file)?;
    let analysis = analyze_source(&source)?;
    if let Some(issue) = &analysis.structure.syntax_error {
        println!(
            "⚠️  Syntax error at line {}, column {}: {}",
            issue.line, issue.column, issue.message
        );
    }

    let llm = app.llm()?;
    let templates = app.templates();
    let registry = PatternsRegistry::new()?;
    let engine = RefactoringEngine::new(&llm, &templates, &registry, app.config.max_tokens);

    println!("🤖 Requesting analysis from {}...", llm.name());
    let answer = engine.analyze_with_llm(&source, &analysis.structure).await?;

    let report = file_analysis_markdown(
        &file,
        &source,
        &analysis.structure,
        analysis.metrics.as_ref(),
        &answer,
    );

    let output = output.unwrap_or_else(|| {
        let stem = file
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "module".to_string());
        file.with_file_name(format!("{stem}-analysis.md"))
    });
    write_file_checked(&output, &report)?;

    println!("✅ Report saved to {}", output.display());
    Ok(())
}

fn run_analyze(
    app: &App,
    path: &Path,
    with_metrics: bool,
    with_patterns: bool,
    with_suggestions: bool,
    format: &str,
) -> Result<()> {
    let path = app.target(path);
    let files = collect_python_files(&path, &app.config.exclude_patterns, &app.skip_dirs())?;
    if files.is_empty() {
        println!("No Python files found in {}", path.display());
        return Ok(());
    }
    info!("Analyzing {} Python files in {}", files.len(), path.display());

    let registry = PatternsRegistry::new()?;
    let detector = PatternDetector::new();
    let generator = SuggestionGenerator::new(&registry);
    let mut store = app.store();

    let mut results = Vec::with_capacity(files.len());
    for file in &files {
        let mut result = FileAnalysisResult::new(file);

        let parsed = match read_source(file).and_then(|source| ParsedSource::parse(&source)) {
            Ok(parsed) => parsed,
            Err(err) => {
                result.error = Some(format!("{err:#}"));
                results.push(result);
                continue;
            }
        };

        if let Some(issue) = parsed.syntax_error() {
            result.error = Some(format!("Syntax error at line {}: {}", issue.line, issue.message));
            results.push(result);
            continue;
        }

        if with_metrics {
            result.metrics = Some(metrics_of(&parsed)?);
        }
        if with_patterns {
            result.patterns = detector.detect_parsed(&parsed);
        }
        if with_suggestions {
            let ids = generator.generate_for_file(&mut store, file)?;
            result.suggestions = ids.iter().filter_map(|id| store.get(*id).cloned()).collect();
        }

        results.push(result);
    }

    println!("{}", generate_report(&results, format)?);
    Ok(())
}

fn run_patterns(detail: bool, compare: bool, pattern: Option<&str>) -> Result<()> {
    let registry = PatternsRegistry::new()?;

    if compare {
        println!("{}", render_comparison(&registry));
        return Ok(());
    }

    if let Some(name) = pattern {
        let Some(info) = registry.get(name) else {
            let known: Vec<_> = registry.all().iter().map(|p| p.key.as_str()).collect();
            bail!("Unknown pattern '{name}'. Known patterns: {}", known.join(", "));
        };
        println!("{}", render_details(info));
        return Ok(());
    }

    println!("📚 Design Patterns\n");
    for category in PatternCategory::ALL {
        println!("📂 {category} ({})", category.focus());
        for info in registry.by_category(category) {
            if detail {
                println!("{}", render_details(info));
            } else {
                println!("  • {} [{}]: {}", info.name, info.key, info.description);
            }
        }
        println!();
    }
    Ok(())
}

fn run_pattern_guide() -> Result<()> {
    let registry = PatternsRegistry::new()?;
    println!("{}", render_guide(&registry));
    Ok(())
}

fn run_pattern_diagram(name: &str) -> Result<()> {
    let registry = PatternsRegistry::new()?;
    let Some(info) = registry.get(name) else {
        bail!("Unknown pattern '{name}'. Known patterns: {}", registry.keys().join(", "));
    };
    println!("{}", render_diagram(info));
    Ok(())
}

struct RefactorOptions {
    use_llm: bool,
    backup: bool,
    preview: bool,
    apply: bool,
    id: Option<u32>,
    in_place: bool,
    assume_yes: bool,
    branch: Option<String>,
    commit: Option<String>,
}

impl RefactorOptions {
    /// Why the chosen suggestion cannot be turned into code, if it cannot.
    fn generation_blocker(&self) -> Option<&'static str> {
        if self.apply && !self.use_llm {
            Some("Generating refactored code needs the LLM; run without --no-llm to apply a suggestion")
        } else {
            None
        }
    }
}

async fn run_refactor(app: &App, file: &Path, options: RefactorOptions) -> Result<()> {
    let file = app.target(file);
    let source = read_source(&file)?;
    println!("🔍 Looking for refactorings in {}\n", file.display());

    let registry = PatternsRegistry::new()?;
    let templates = app.templates();
    let llm = app.llm()?;
    let engine = RefactoringEngine::new(&llm, &templates, &registry, app.config.max_tokens);
    let mut store = app.store();

    let mut ids = SuggestionGenerator::new(&registry).generate_for_file(&mut store, &file)?;
    if options.use_llm {
        println!("🤖 Asking {} for suggestions...", llm.name());
        match engine.suggest_refactorings(&file).await {
            Ok(found) => ids.extend(store_llm_suggestions(&mut store, &file, &found)?),
            Err(err) => println!("⚠️  LLM suggestions unavailable: {err:#}"),
        }
    }

    if ids.is_empty() {
        println!("✅ No refactorings suggested for {}", file.display());
        return Ok(());
    }

    println!("\n📋 {} suggestions:\n", ids.len());
    for id in &ids {
        if let Some(suggestion) = store.get(*id) {
            print_suggestion(suggestion);
        }
    }

    if !options.apply {
        println!("\nRun again with --apply to apply one of them.");
        return Ok(());
    }
    if let Some(reason) = options.generation_blocker() {
        println!("\n❌ {reason}");
        return Ok(());
    }

    let id = match options.id {
        Some(id) => id,
        None => {
            let answer = prompt_line("\nSuggestion id to apply:")?;
            answer
                .parse::<u32>()
                .with_context(|| format!("Invalid suggestion id: {answer}"))?
        }
    };
    let suggestion = store
        .get(id)
        .cloned()
        .with_context(|| format!("Suggestion {id} not found"))?;

    println!("\n🤖 Generating refactored code for [{id}] {}...", suggestion.kind);
    let Some(new_code) = engine.generate_refactored_code(&source, &suggestion).await? else {
        println!("❌ The model did not return any code");
        return Ok(());
    };

    if let Some(issue) = validate_python(&new_code)? {
        println!(
            "❌ Generated code has a syntax error at line {}: {}",
            issue.line, issue.message
        );
        return Ok(());
    }

    let change = CodeChange::new(&file, &source, &new_code, &suggestion.description, &suggestion.kind);
    if change.is_noop() {
        println!("ℹ️  Generated code is identical to the original");
        return Ok(());
    }

    if options.preview {
        println!("\n{}", change.diff);
    }

    if !confirm("Apply this change?", options.assume_yes)? {
        println!("Cancelled.");
        return Ok(());
    }

    let mut manager = app.change_manager();
    let git = manager.git();
    if let Some(branch) = &options.branch {
        if git.is_git_repo() {
            git.create_branch(branch)?;
        } else {
            println!("⚠️  Not a git repository, staying on the current checkout");
        }
    }

    let written = if options.in_place {
        if let Some(backup) = manager.apply_change(change, options.backup)? {
            println!("💾 Backup saved to {}", backup.display());
        }
        file.clone()
    } else {
        manager.write_alongside(&file, &suggestion.kind, &new_code)?
    };
    println!("✅ Wrote {}", written.display());

    store.mark_applied(id)?;

    if let Some(message) = &options.commit {
        if git.is_git_repo() {
            git.commit_changes(message, &[written])?;
        } else {
            println!("⚠️  Not a git repository, skipping commit");
        }
    }

    Ok(())
}

fn run_suggestions(app: &App, file: Option<&Path>, pending: bool, remove: Option<u32>) -> Result<()> {
    let mut store = app.store();

    if let Some(id) = remove {
        if store.remove(id)? {
            println!("✅ Removed suggestion {id}");
        } else {
            println!("❌ Suggestion {id} not found");
        }
        return Ok(());
    }

    let mut listed: Vec<&RefactoringSuggestion> = match file {
        Some(file) => store.for_file(&app.target(file)),
        None => store.all().iter().collect(),
    };
    if pending {
        listed.retain(|s| !s.applied);
    }

    if listed.is_empty() {
        println!("No suggestions stored.");
        return Ok(());
    }

    println!("📋 {} suggestions\n", listed.len());
    for suggestion in listed {
        print_suggestion(suggestion);
    }
    Ok(())
}

async fn run_analyze_performance(app: &App, file: &Path, output: Option<&Path>, optimize: bool) -> Result<()> {
    let file = app.target(file);
    let source = read_source(&file)?;

    let analyzer = PerformanceAnalyzer::new();
    let report = analyzer.analyze(&source)?;
    let suggestions = analyzer.suggest_improvements(&report);
    let markdown = perf::render_report(&file.display().to_string(), &report, &suggestions);

    match output {
        Some(output) => {
            write_file_checked(output, &markdown)?;
            println!("📊 Found {} performance issues", report.issues.len());
            println!("✅ Report saved to {}", output.display());
        }
        None => println!("{markdown}"),
    }

    if !optimize {
        return Ok(());
    }
    if report.issues.is_empty() {
        println!("✅ Nothing to optimize");
        return Ok(());
    }

    let llm = app.llm()?;
    let templates = app.templates();
    let optimizer = PerformanceOptimizer::new(Some(&llm as &dyn CompletionProvider), &templates, app.config.max_tokens);
    let result = optimizer.optimize(&source, &report.issues).await?;

    if result.code == source {
        println!("ℹ️  No automatic optimization applies to this file");
        return Ok(());
    }
    if let Some(issue) = validate_python(&result.code)? {
        println!(
            "❌ Optimized code has a syntax error at line {}: {}",
            issue.line, issue.message
        );
        return Ok(());
    }

    let target = app.change_manager().write_alongside(&file, "optimized", &result.code)?;
    let how = if result.used_llm { "LLM" } else { "rules" };
    println!("⚡ Optimized with {how}:");
    for change in &result.changes {
        println!("  • {change}");
    }
    println!("✅ Wrote {}", target.display());
    Ok(())
}

fn run_generate_docs(app: &App, path: &Path, output_dir: &Path, check_consistency: bool) -> Result<()> {
    let path = app.target(path);
    let output_dir = app.config.resolve(&app.project, output_dir);
    println!("📝 Generating documentation for {}\n", path.display());

    let missing = if path.is_file() {
        if !is_python_file(&path) {
            bail!("Not a Python file: {}", path.display());
        }
        let root = path.parent().unwrap_or(Path::new("."));
        let generator = DocGenerator::new(root, &output_dir);
        match generator.generate_for_file(&path)? {
            Some(result) => {
                println!("✅ Wrote {}", result.output_file.display());
                println!(
                    "📊 {} classes, {} functions",
                    result.classes_documented, result.functions_documented
                );
                result.missing_docstrings
            }
            None => {
                println!("❌ {} has syntax errors, skipped", path.display());
                return Ok(());
            }
        }
    } else {
        let generator = DocGenerator::new(&path, &output_dir)
            .with_excludes(&app.config.exclude_patterns)
            .with_skip_dirs(&app.skip_dirs());
        let stats = generator.generate_for_project()?;
        println!(
            "✅ Documented {} modules ({} classes, {} functions) in {}",
            stats.files_processed,
            stats.classes_documented,
            stats.functions_documented,
            output_dir.display()
        );
        stats.missing_docstrings
    };

    if !missing.is_empty() {
        println!("\n⚠️  {} items without docstrings:", missing.len());
        for item in &missing {
            println!("  • {item}");
        }
    }

    if !check_consistency {
        return Ok(());
    }

    println!("\n🔍 Docstring consistency\n");
    let checker = ConsistencyChecker::new();
    for file in collect_python_files(&path, &app.config.exclude_patterns, &app.skip_dirs())? {
        if file.starts_with(&output_dir) {
            continue;
        }
        let report = checker.check_file(&file)?;
        if report.total_findings() == 0 {
            continue;
        }

        println!(
            "📄 {} ({:.1}% consistent)",
            file.display(),
            report.overall_consistency
        );
        for finding in &report.module_inconsistencies {
            println!("  • module: {finding}");
        }
        for (name, findings) in report
            .class_inconsistencies
            .iter()
            .chain(report.function_inconsistencies.iter())
        {
            for finding in findings {
                println!("  • {name}: {finding}");
            }
        }
    }
    Ok(())
}

fn run_analyze_api(
    app: &App,
    path: &Path,
    framework: Option<&str>,
    endpoints_only: bool,
    with_security: bool,
    output: Option<&Path>,
) -> Result<()> {
    let path = app.target(path);
    let mut analyzer = ApiAnalyzer::new(&path)?
        .with_excludes(&app.config.exclude_patterns)
        .with_skip_dirs(&app.skip_dirs());
    if let Some(name) = framework {
        analyzer = analyzer.with_framework(Framework::parse(name)?);
    }
    if analyzer.framework() == Framework::Unknown {
        warn!("Could not detect a web framework, using generic analysis");
    }
    info!("Analyzing API in {} ({} project)", path.display(), analyzer.framework());

    let report = analyzer.analyze(endpoints_only)?;
    let mut markdown = api::render_report(&report);

    if with_security && !endpoints_only {
        let security_report = SecurityScanner::new(&path)?
            .with_framework(analyzer.framework())
            .with_excludes(&app.config.exclude_patterns)
            .with_skip_dirs(&app.skip_dirs())
            .scan()?;
        markdown.push('\n');
        markdown.push_str(&security::render_report(&security_report, true));
    }

    match output {
        Some(output) => {
            write_file_checked(output, &markdown)?;
            println!(
                "🌐 {} endpoints, {} models, RESTful score {}/100",
                report.endpoints.len(),
                report.models.len(),
                report.restful_score
            );
            println!("✅ Report saved to {}", output.display());
        }
        None => println!("{markdown}"),
    }
    Ok(())
}

fn run_api_patterns(pattern: Option<&str>) -> Result<()> {
    let guide = ApiPatternGuide::new()?;
    match pattern {
        Some(name) => {
            let Some(info) = guide.get(name) else {
                bail!("Unknown API pattern '{name}'. Known patterns: {}", guide.keys().join(", "));
            };
            println!("{}", api::render_api_pattern(info));
        }
        None => println!("{}", api::render_api_patterns(&guide)),
    }
    Ok(())
}

async fn run_api_security(
    app: &App,
    path: &Path,
    output: Option<&Path>,
    use_llm: bool,
    compact: bool,
) -> Result<()> {
    let path = app.target(path);
    let scanner = SecurityScanner::new(&path)?
        .with_excludes(&app.config.exclude_patterns)
        .with_skip_dirs(&app.skip_dirs());
    info!("Scanning {} ({} project)", path.display(), scanner.framework());

    let mut report = scanner.scan()?;
    if use_llm {
        let llm = app.llm()?;
        let templates = app.templates();
        security::review_with_llm(
            &mut report,
            &llm,
            &templates,
            SECURITY_REVIEW_FILES,
            app.config.max_tokens,
        )
        .await?;
    }

    let markdown = security::render_report(&report, compact);
    match output {
        Some(output) => {
            write_file_checked(output, &markdown)?;
            println!(
                "🔒 Security score {}/100 with {} findings ({} critical)",
                report.overall_score,
                report.findings.len(),
                report.critical_issues
            );
            println!("✅ Report saved to {}", output.display());
        }
        None => println!("{markdown}"),
    }
    Ok(())
}

fn run_backups(app: &App, restore: Option<&Path>) -> Result<()> {
    let manager = app.change_manager();

    if let Some(dir) = restore {
        let restored = manager.restore_backup(dir)?;
        for file in &restored {
            println!("  ↩️  {}", file.display());
        }
        println!("✅ Restored {} files", restored.len());
        return Ok(());
    }

    let backups = manager.list_backups()?;
    if backups.is_empty() {
        println!("No backups in {}", manager.backup_dir().display());
        return Ok(());
    }

    println!("💾 Backups in {}\n", manager.backup_dir().display());
    for backup in backups {
        match backup.taken_at {
            Some(taken_at) => println!("  {}  ({})", backup.label, taken_at.format("%Y-%m-%d %H:%M:%S")),
            None => println!("  {}", backup.label),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;

    fn refactor_options(use_llm: bool, apply: bool) -> RefactorOptions {
        RefactorOptions {
            use_llm,
            backup: true,
            preview: false,
            apply,
            id: Some(1),
            in_place: true,
            assume_yes: true,
            branch: None,
            commit: None,
        }
    }

    #[test]
    fn test_apply_without_llm_is_blocked() {
        assert!(refactor_options(false, true).generation_blocker().is_some());
        assert!(refactor_options(true, true).generation_blocker().is_none());
        assert!(refactor_options(false, false).generation_blocker().is_none());
    }

    #[tokio::test]
    async fn test_refactor_no_llm_apply_leaves_file_alone() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("calc.py");
        let source = "def add(a, b):\n    return a + b\n";
        fs::write(&file, source).unwrap();

        let app = App {
            project: dir.path().to_path_buf(),
            config: AssistantConfig {
                llm_api_key: String::new(),
                ..AssistantConfig::default()
            },
        };
        run_refactor(&app, &file, refactor_options(false, true)).await.unwrap();

        assert_eq!(fs::read_to_string(&file).unwrap(), source);
        let store = app.store();
        assert!(!store.all().is_empty());
        assert!(store.all().iter().all(|s| !s.applied));
        assert!(!dir.path().join(".refactor_backups").exists());
    }

    #[test]
    fn test_skip_dirs_follow_backup_dir() {
        let app = App {
            project: PathBuf::from("/work/project"),
            config: AssistantConfig {
                backup_dir: PathBuf::from("snapshots"),
                ..AssistantConfig::default()
            },
        };
        assert_eq!(app.skip_dirs(), vec![PathBuf::from("/work/project/snapshots")]);
    }

    #[test]
    fn test_analyze_api_writes_report() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("app.py"),
            "from flask import Flask\napp = Flask(__name__)\n\n@app.route('/api/v1/users')\ndef users():\n    return []\n",
        )
        .unwrap();
        let app = App {
            project: dir.path().to_path_buf(),
            config: AssistantConfig::default(),
        };
        let output = dir.path().join("api.md");

        run_analyze_api(&app, dir.path(), Some("flask"), false, true, Some(&output)).unwrap();

        let report = fs::read_to_string(&output).unwrap();
        assert!(report.contains("| `/api/v1/users` | GET | `users` | app.py:5 |"));
        assert!(report.contains("## RESTful Design Score: 100/100"));
        assert!(report.contains("# API Security Report"));
        assert!(run_analyze_api(&app, dir.path(), Some("rails"), false, false, None).is_err());
    }

    #[test]
    fn test_unknown_pattern_names_are_errors() {
        assert!(run_pattern_diagram("observer").is_ok());
        assert!(run_pattern_diagram("visitor").is_err());
        assert!(run_api_patterns(Some("crud")).is_ok());
        assert!(run_api_patterns(Some("soap")).is_err());
    }
}
