use std::fmt::Write as _;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Args;
use time::OffsetDateTime;
use unicode_segmentation::UnicodeSegmentation;

use crate::config::{AppConfig, ConfigPaths};
use crate::entry::{parse_tag_string, DiaryEntry, EntryDraft, Mood, Weather};
use crate::error::{Operation, StoreError, StoreEvent};
use crate::prompt::PromptGenerator;
use crate::search::parse_day;
use crate::stats::Stats;
use crate::store::{export_file_name, EntryStore, Initialized, Mutation};

const SNIPPET_GRAPHEMES: usize = 80;

#[derive(Args, Debug, Clone)]
pub struct NewArgs {
    /// Title for the entry (prompted if omitted)
    #[arg()]
    pub title: Option<String>,
    /// Provide the entry body inline. If omitted, reads from stdin.
    #[arg(long)]
    pub body: Option<String>,
    /// Comma-separated tags
    #[arg(long)]
    pub tags: Option<String>,
    #[arg(long)]
    pub mood: Option<Mood>,
    #[arg(long)]
    pub weather: Option<Weather>,
    #[arg(long)]
    pub image_url: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct EditArgs {
    /// Entry identifier
    pub id: String,
    #[arg(long)]
    pub title: Option<String>,
    /// Replace the body; pass `-` to read it from stdin
    #[arg(long)]
    pub body: Option<String>,
    /// Replace all tags with this comma-separated list
    #[arg(long)]
    pub tags: Option<String>,
    #[arg(long)]
    pub mood: Option<Mood>,
    #[arg(long)]
    pub weather: Option<Weather>,
    #[arg(long)]
    pub image_url: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct DeleteArgs {
    /// Entry identifier
    pub id: String,
}

#[derive(Args, Debug, Clone)]
pub struct ShowArgs {
    /// Entry identifier
    pub id: String,
}

#[derive(Args, Debug, Clone, Default)]
pub struct ListArgs {
    /// Case-insensitive match against title, content and tags
    #[arg(long)]
    pub search: Option<String>,
    /// Only entries written on this day (YYYY-MM-DD)
    #[arg(long)]
    pub date: Option<String>,
    /// Maximum number of entries printed (defaults to list_limit from config)
    #[arg(long)]
    pub limit: Option<usize>,
}

#[derive(Args, Debug, Clone)]
pub struct ImportArgs {
    /// JSON file holding an array of entries
    pub file: PathBuf,
}

#[derive(Args, Debug, Clone, Default)]
pub struct ExportArgs {
    /// Directory for the export file (defaults to the data directory's exports/)
    #[arg(long)]
    pub out: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct WatchArgs {
    /// Exit after this many updates instead of running until interrupted
    #[arg(long)]
    pub updates: Option<usize>,
}

pub fn new_entry(store: &mut EntryStore, args: NewArgs) -> Result<()> {
    let mut title = match args.title.clone() {
        Some(t) => t,
        None => prompt("Title")?,
    };
    title = title.trim().to_owned();
    if title.is_empty() {
        bail!("entry title cannot be empty");
    }
    let body = if let Some(body) = args.body.clone() {
        body
    } else {
        read_stdin()?.unwrap_or_default()
    };
    let id = create_entry(store, &args, title, body)?;
    println!("Created entry {id}");
    Ok(())
}

fn create_entry(store: &mut EntryStore, args: &NewArgs, title: String, body: String) -> Result<String> {
    let mut draft = EntryDraft::new(title, body).with_tags(args.tags.clone().unwrap_or_default());
    if let Some(mood) = args.mood {
        draft = draft.with_mood(mood);
    }
    if let Some(weather) = args.weather {
        draft = draft.with_weather(weather);
    }
    draft.image_url = args.image_url.clone().filter(|url| !url.trim().is_empty());

    let applied = store.add_entry(draft);
    check_saved(applied.persisted, "saving new entry")?;
    Ok(applied.value)
}

pub fn edit_entry(store: &mut EntryStore, args: EditArgs) -> Result<()> {
    let body = match args.body.as_deref() {
        Some("-") => Some(read_stdin()?.unwrap_or_default()),
        other => other.map(str::to_owned),
    };
    let entry = apply_edit(store, &args, body)?;
    println!("Updated entry {} ({})", entry.id, entry.title);
    Ok(())
}

fn apply_edit(store: &mut EntryStore, args: &EditArgs, body: Option<String>) -> Result<DiaryEntry> {
    let Some(mut entry) = store.entry(&args.id).cloned() else {
        bail!("entry {} not found", args.id);
    };
    if let Some(title) = &args.title {
        let title = title.trim();
        if title.is_empty() {
            bail!("entry title cannot be empty");
        }
        entry.title = title.to_owned();
    }
    if let Some(body) = body {
        entry.content = body;
    }
    if let Some(tags) = &args.tags {
        entry.tags = parse_tag_string(tags);
    }
    if args.mood.is_some() {
        entry.mood = args.mood;
    }
    if args.weather.is_some() {
        entry.weather = args.weather;
    }
    if let Some(url) = &args.image_url {
        entry.image_url = Some(url.trim().to_owned()).filter(|u| !u.is_empty());
    }

    match store.update_entry(entry) {
        Mutation::NotFound => bail!("entry {} not found", args.id),
        Mutation::Applied { persisted } => check_saved(persisted, "saving entry")?,
    }
    store
        .entry(&args.id)
        .cloned()
        .with_context(|| format!("entry {} vanished after update", args.id))
}

/// Turns a failed write-through into an error, pointing at sign-in when the
/// backend refused it.
fn check_saved(persisted: Result<(), StoreError>, action: &str) -> Result<()> {
    match persisted {
        Ok(()) => Ok(()),
        Err(err) if err.is_permission_denied() => Err(err)
            .with_context(|| format!("{action} (sign in with --user or set [remote] user)")),
        Err(err) => Err(err).with_context(|| action.to_string()),
    }
}

pub fn delete_entry(store: &mut EntryStore, args: DeleteArgs) -> Result<()> {
    match store.delete_entry(&args.id) {
        Mutation::NotFound => println!("No entry {} (nothing to delete)", args.id),
        Mutation::Applied { persisted } => {
            check_saved(persisted, &format!("deleting entry {}", args.id))?;
            println!("Deleted entry {}", args.id);
        }
    }
    Ok(())
}

pub fn show_entry(store: &EntryStore, args: ShowArgs) -> Result<()> {
    let Some(entry) = store.entry(&args.id) else {
        bail!("entry {} not found", args.id);
    };
    print!("{}", format_entry(entry));
    Ok(())
}

pub fn list_entries(store: &mut EntryStore, config: &AppConfig, args: ListArgs) -> Result<()> {
    let output = run_list(store, config, &args)?;
    print!("{output}");
    Ok(())
}

fn run_list(store: &mut EntryStore, config: &AppConfig, args: &ListArgs) -> Result<String> {
    let selected = match args.date.as_deref() {
        Some(raw) => match parse_day(raw) {
            Some(day) => Some(day),
            None => bail!("invalid date '{raw}', expected YYYY-MM-DD"),
        },
        None => None,
    };
    store.set_search_term(args.search.clone().unwrap_or_default().trim());
    store.set_selected_date(selected);

    let limit = args.limit.unwrap_or(config.list_limit);
    let view = store.view();
    let total = view.count();
    if total == 0 {
        return Ok("No entries found.\n".to_string());
    }

    let mut out = String::new();
    if store.is_filtered() {
        let mut filters = Vec::new();
        if !store.search_term().is_empty() {
            filters.push(format!("matching '{}'", store.search_term()));
        }
        if let Some(day) = store.selected_date() {
            filters.push(format!("on {day}"));
        }
        let _ = writeln!(
            &mut out,
            "{total} entr{} {}\n",
            if total == 1 { "y" } else { "ies" },
            filters.join(" ")
        );
    }
    for entry in view.iter().take(limit) {
        let mut headline = format!("{}  {}", display_date(entry), entry.title);
        if let Some(mood) = entry.mood {
            let _ = write!(&mut headline, "  [{mood}]");
        }
        let _ = writeln!(&mut out, "{headline}");
        let _ = writeln!(&mut out, "    id      {}", entry.id);
        if !entry.tags.is_empty() {
            let _ = writeln!(&mut out, "    tags    {}", format_tags(&entry.tags));
        }
        if let Some(snippet) = build_snippet(&entry.content) {
            let _ = writeln!(&mut out, "    {snippet}");
        }
        out.push('\n');
    }
    if total > limit {
        let _ = writeln!(&mut out, "({} more not shown)", total - limit);
    }
    Ok(out)
}

pub fn list_tags(store: &EntryStore) -> Result<()> {
    if store.tags().is_empty() {
        println!("(no tags)");
        return Ok(());
    }
    for tag in store.tags() {
        let uses = store.entries().iter().filter(|e| e.has_tag(tag)).count();
        println!("#{tag} ({uses})");
    }
    Ok(())
}

pub fn import_entries(store: &mut EntryStore, args: ImportArgs) -> Result<()> {
    let message = run_import(store, &args.file)?;
    println!("{message}");
    Ok(())
}

fn run_import(store: &mut EntryStore, file: &Path) -> Result<String> {
    let raw = fs::read_to_string(file)
        .with_context(|| format!("reading import file {}", file.display()))?;
    let report = store
        .import_json(&raw)
        .with_context(|| format!("importing {}", file.display()))?;
    let mut message = format!(
        "Imported {} entr{} ({} new, {} replaced)",
        report.accepted(),
        if report.accepted() == 1 { "y" } else { "ies" },
        report.added,
        report.replaced
    );
    if report.rejected > 0 {
        let _ = write!(&mut message, ", skipped {} invalid", report.rejected);
    }
    Ok(message)
}

pub fn export_entries(store: &EntryStore, paths: &ConfigPaths, args: ExportArgs) -> Result<()> {
    let dir = args.out.unwrap_or_else(|| paths.export_dir.clone());
    let path = write_export(store, &dir, OffsetDateTime::now_utc().date())?;
    println!(
        "Exported {} entr{} to {}",
        store.entries().len(),
        if store.entries().len() == 1 { "y" } else { "ies" },
        path.display()
    );
    Ok(())
}

fn write_export(store: &EntryStore, dir: &Path, today: time::Date) -> Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    let json = store.export_json().context("serialising entries for export")?;
    let path = dir.join(export_file_name(today));
    fs::write(&path, json).with_context(|| format!("writing export {}", path.display()))?;
    Ok(path)
}

pub fn suggest_prompt(store: &EntryStore, config: &AppConfig) -> Result<()> {
    let generator = PromptGenerator::new(&config.prompt).context("building prompt client")?;
    let context = store.recent_context(config.prompt.context_entries);
    let prompt = generator.generate(&context).context("generating writing prompt")?;
    println!("{prompt}");
    Ok(())
}

pub fn show_stats(store: &EntryStore) -> Result<()> {
    let stats = Stats::from_entries(store.entries(), OffsetDateTime::now_utc().date());
    print!("{}", format_stats(&stats));
    Ok(())
}

fn format_stats(stats: &Stats) -> String {
    let mut out = String::new();
    let _ = writeln!(&mut out, "Entries        {}", stats.total);
    let _ = writeln!(&mut out, "Distinct tags  {}", stats.distinct_tags);
    let _ = writeln!(
        &mut out,
        "Current streak {} day{}",
        stats.current_streak,
        if stats.current_streak == 1 { "" } else { "s" }
    );
    out.push_str("\nMood\n");
    for (mood, count) in &stats.moods {
        let _ = writeln!(&mut out, "  {:<10} {count}", mood.to_string());
    }
    let _ = writeln!(&mut out, "  {:<10} {}", "(none)", stats.untracked_mood);
    out.push_str("\nWeather\n");
    for (kind, count) in &stats.weather {
        let _ = writeln!(&mut out, "  {:<10} {count}", kind.to_string());
    }
    if !stats.per_month.is_empty() {
        out.push_str("\nPer month\n");
        for (month, count) in &stats.per_month {
            let _ = writeln!(&mut out, "  {month}    {count}");
        }
    }
    out
}

pub fn watch(store: &mut EntryStore, args: WatchArgs) -> Result<()> {
    let mut subscription = match store.initialize().context("starting live sync")? {
        Initialized::Subscribed(subscription) => subscription,
        Initialized::Loaded { .. } | Initialized::AlreadyReady => {
            println!(
                "Live sync is not available for the {} backend; showing {} stored entries.",
                store.backend().kind(),
                store.entries().len()
            );
            return Ok(());
        }
    };

    let events = store.events();
    let mut seen = 0usize;
    let outcome = loop {
        if args.updates.is_some_and(|limit| seen >= limit) {
            break Ok(());
        }
        if store.wait_for_sync(Duration::from_secs(1)) > 0 {
            seen += 1;
            println!(
                "[{}] {} entries, {} tags",
                seen,
                store.entries().len(),
                store.tags().len()
            );
        }
        let failure = events.try_iter().find_map(|event| match event {
            StoreEvent::SubscriptionFailed { message } => Some(message),
            _ => None,
        });
        if let Some(message) = failure {
            break Err(anyhow::anyhow!(message));
        }
        if !subscription.is_active() {
            break Err(anyhow::Error::new(StoreError::Remote {
                op: Operation::List,
                path: store.backend().location(),
                message: "watcher stopped".into(),
            }));
        }
    };
    subscription.stop();
    outcome.context("live sync ended")
}

fn prompt(label: &str) -> Result<String> {
    use std::io::Write;
    let mut stdout = io::stdout();
    write!(stdout, "{}: ", label)?;
    stdout.flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim_end().to_owned())
}

fn read_stdin() -> Result<Option<String>> {
    if atty::is(atty::Stream::Stdin) {
        return Ok(None);
    }
    let mut buf = String::new();
    io::stdin().read_to_string(&mut buf)?;
    Ok(Some(buf))
}

fn format_entry(entry: &DiaryEntry) -> String {
    let mut out = String::new();
    let _ = writeln!(&mut out, "{}", entry.title);
    let _ = writeln!(&mut out, "  id       {}", entry.id);
    let _ = writeln!(&mut out, "  date     {}", entry.date);
    if let Some(mood) = entry.mood {
        let _ = writeln!(&mut out, "  mood     {mood}");
    }
    if let Some(weather) = entry.weather {
        let _ = writeln!(&mut out, "  weather  {weather}");
    }
    if !entry.tags.is_empty() {
        let _ = writeln!(&mut out, "  tags     {}", format_tags(&entry.tags));
    }
    if let Some(url) = &entry.image_url {
        let _ = writeln!(&mut out, "  image    {url}");
    }
    out.push('\n');
    out.push_str(entry.content.trim_end());
    out.push('\n');
    out
}

fn display_date(entry: &DiaryEntry) -> String {
    entry
        .day()
        .map(|day| day.to_string())
        .unwrap_or_else(|| entry.date.clone())
}

fn build_snippet(content: &str) -> Option<String> {
    let flattened = content.split_whitespace().collect::<Vec<_>>().join(" ");
    if flattened.is_empty() {
        return None;
    }
    let mut graphemes = flattened.graphemes(true);
    let mut snippet: String = graphemes.by_ref().take(SNIPPET_GRAPHEMES).collect();
    if graphemes.next().is_some() {
        snippet.push('…');
    }
    Some(snippet)
}

fn format_tags(tags: &[String]) -> String {
    tags.iter()
        .map(|tag| format!("#{}", tag))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LocalBackend;
    use tempfile::TempDir;
    use time::macros::date;

    type TestResult<T = ()> = Result<T>;

    fn setup_store() -> TestResult<(TempDir, EntryStore)> {
        let temp = TempDir::new().context("creating temp dir")?;
        let backend = LocalBackend::open(&temp.path().join("local"), "diaryEntries")?;
        let mut store = EntryStore::new(Box::new(backend));
        store.initialize()?;
        Ok((temp, store))
    }

    fn new_args(tags: &str, mood: Option<Mood>) -> NewArgs {
        NewArgs {
            title: None,
            body: None,
            tags: Some(tags.into()),
            mood,
            weather: None,
            image_url: None,
        }
    }

    #[test]
    fn cli_list_filters_by_search_term_and_marks_mood() -> TestResult {
        let (_temp, mut store) = setup_store()?;
        create_entry(
            &mut store,
            &new_args("work, planning", Some(Mood::Anxious)),
            "Sprint review".into(),
            "Demo went fine".into(),
        )?;
        create_entry(&mut store, &new_args("", None), "Walk".into(), "Park".into())?;

        let args = ListArgs {
            search: Some("WORK".into()),
            ..ListArgs::default()
        };
        let output = run_list(&mut store, &AppConfig::default(), &args)?;
        assert!(output.starts_with("1 entry matching 'WORK'\n"));
        assert!(output.contains("Sprint review  [anxious]"));
        assert!(output.contains("#work #planning"));
        assert!(!output.contains("Walk"));
        Ok(())
    }

    #[test]
    fn cli_list_rejects_bad_dates_and_honours_limit() -> TestResult {
        let (_temp, mut store) = setup_store()?;
        for title in ["one", "two", "three"] {
            create_entry(&mut store, &new_args("", None), title.into(), String::new())?;
        }
        let bad = ListArgs {
            date: Some("yesterday".into()),
            ..ListArgs::default()
        };
        assert!(run_list(&mut store, &AppConfig::default(), &bad).is_err());

        let limited = ListArgs {
            limit: Some(2),
            ..ListArgs::default()
        };
        let output = run_list(&mut store, &AppConfig::default(), &limited)?;
        assert!(output.contains("(1 more not shown)"));
        assert!(!output.contains("matching"), "unfiltered listing has no header");
        Ok(())
    }

    #[test]
    fn cli_edit_keeps_date_and_replaces_tags() -> TestResult {
        let (_temp, mut store) = setup_store()?;
        let id = create_entry(&mut store, &new_args("old", None), "Draft".into(), "x".into())?;
        let original_date = store.entry(&id).map(|e| e.date.clone());

        let args = EditArgs {
            id: id.clone(),
            title: Some("Final".into()),
            body: None,
            tags: Some("new, new ,fresh".into()),
            mood: Some(Mood::Calm),
            weather: None,
            image_url: None,
        };
        let updated = apply_edit(&mut store, &args, Some("rewritten".into()))?;
        assert_eq!(updated.title, "Final");
        assert_eq!(updated.content, "rewritten");
        assert_eq!(updated.tags, vec!["new", "fresh"]);
        assert_eq!(Some(updated.date), original_date);
        assert_eq!(store.tags(), ["fresh", "new"]);
        Ok(())
    }

    #[test]
    fn cli_edit_unknown_entry_fails() -> TestResult {
        let (_temp, mut store) = setup_store()?;
        let args = EditArgs {
            id: "missing".into(),
            title: Some("x".into()),
            body: None,
            tags: None,
            mood: None,
            weather: None,
            image_url: None,
        };
        assert!(apply_edit(&mut store, &args, None).is_err());
        Ok(())
    }

    #[test]
    fn cli_export_then_import_into_fresh_store() -> TestResult {
        let (temp, mut store) = setup_store()?;
        create_entry(&mut store, &new_args("a", None), "First".into(), "1".into())?;
        create_entry(&mut store, &new_args("b", None), "Second".into(), "2".into())?;

        let path = write_export(&store, &temp.path().join("out"), date!(2024 - 06 - 01))?;
        assert!(path.ends_with("diary-export-2024-06-01.json"));

        let other = TempDir::new()?;
        let backend = LocalBackend::open(other.path(), "diaryEntries")?;
        let mut fresh = EntryStore::new(Box::new(backend));
        fresh.initialize()?;
        let message = run_import(&mut fresh, &path)?;
        assert_eq!(message, "Imported 2 entries (2 new, 0 replaced)");
        assert_eq!(fresh.tags(), ["a", "b"]);
        Ok(())
    }

    #[test]
    fn cli_import_reports_skipped_records() -> TestResult {
        let (temp, mut store) = setup_store()?;
        let file = temp.path().join("import.json");
        fs::write(
            &file,
            r#"[{"id":"a","date":"2024-01-01T00:00:00Z","title":"Kept","content":"c"},{"id":"b"}]"#,
        )?;
        let message = run_import(&mut store, &file)?;
        assert_eq!(message, "Imported 1 entry (1 new, 0 replaced), skipped 1 invalid");

        fs::write(&file, "not json")?;
        assert!(run_import(&mut store, &file).is_err());
        assert_eq!(store.entries().len(), 1);
        Ok(())
    }

    #[test]
    fn cli_new_records_mood_and_weather() -> TestResult {
        let (_temp, mut store) = setup_store()?;
        let mut args = new_args("outdoors", Some(Mood::Excited));
        args.weather = Some(Weather::Windy);
        let id = create_entry(&mut store, &args, "Kite".into(), String::new())?;
        let entry = store.entry(&id).context("entry stored")?;
        assert_eq!(entry.mood, Some(Mood::Excited));
        assert_eq!(entry.weather, Some(Weather::Windy));
        Ok(())
    }

    #[test]
    fn refused_write_points_at_sign_in() {
        let refused = Err(StoreError::PermissionDenied {
            op: Operation::Write,
            path: "users/<unauthenticated>/diaryEntries".into(),
        });
        let message = format!("{:#}", check_saved(refused, "saving new entry").unwrap_err());
        assert!(message.contains("sign in with --user"));
        assert!(message.contains("missing or insufficient permissions"));

        let failed = Err(StoreError::Serialization("boom".into()));
        let message = format!("{:#}", check_saved(failed, "saving entry").unwrap_err());
        assert!(!message.contains("sign in"));
    }

    #[test]
    fn snippet_truncates_on_grapheme_boundaries() {
        let long = "é".repeat(SNIPPET_GRAPHEMES + 5);
        let snippet = build_snippet(&long).unwrap_or_default();
        assert_eq!(snippet.graphemes(true).count(), SNIPPET_GRAPHEMES + 1);
        assert!(snippet.ends_with('…'));
        assert_eq!(build_snippet("  \n "), None);
        assert_eq!(build_snippet("a\nb"), Some("a b".to_string()));
    }

    #[test]
    fn stats_output_lists_every_mood() {
        let stats = Stats::from_entries(&[], date!(2024 - 01 - 01));
        let output = format_stats(&stats);
        for mood in ["happy", "sad", "neutral", "excited", "anxious", "calm"] {
            assert!(output.contains(mood), "missing {mood}");
        }
        assert!(output.contains("Current streak 0 days"));
    }
}
