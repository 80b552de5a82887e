fn main() {
    revive::main()
}
