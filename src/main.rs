fn main() -> anyhow::Result<()> {
    rtc_echo::run()
}
