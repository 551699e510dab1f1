fn main() {
    stratapool::main()
}
