fn main() -> anyhow::Result<()> {
    flipfocus_lib::run()
}
