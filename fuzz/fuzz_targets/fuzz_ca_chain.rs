//! Fuzz target: `CaChain::from_pem`
//!
//! Arbitrary bytes must either be rejected or produce a chain that keeps
//! the input verbatim with a single trailing NUL and at least one
//! certificate.
//!
//! cargo fuzz run fuzz_ca_chain

#![no_main]

use libfuzzer_sys::fuzz_target;
use securelink::credentials::{CaChain, MAX_CA_CHAIN_LEN};

fuzz_target!(|data: &[u8]| {
    let Ok(chain) = CaChain::from_pem(data) else {
        return;
    };
    assert!(data.len() <= MAX_CA_CHAIN_LEN);
    assert_eq!(chain.as_pem(), data);
    assert_eq!(chain.as_nul_terminated().len(), data.len() + 1);
    assert_eq!(chain.as_nul_terminated().last(), Some(&0));
    assert!(chain.certificate_count() >= 1);
});
