fn main() -> anyhow::Result<()> {
    skinalize_core::run()
}
