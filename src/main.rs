fn main() {
    std::process::exit(destroy_gate::run());
}
