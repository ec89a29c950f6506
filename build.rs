fn main() {
    println!("cargo:rerun-if-changed=certs/ca_chain.pem");

    #[cfg(feature = "espidf")]
    embuild::espidf::sysenv::output();
}
