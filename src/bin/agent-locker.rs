fn main() {
    std::process::exit(agent_locker::cli::run());
}
