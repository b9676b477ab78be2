fn main() -> anyhow::Result<()> {
    diary_sync::cli::run()
}
