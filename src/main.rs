fn main() {
    std::process::exit(prdeploy::run());
}
