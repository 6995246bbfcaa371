fn main() {
    std::process::exit(sudosh::main());
}
