use pvault_crypto::{blob_aad, CryptoProvider, SystemCrypto};

fn make_data(size: usize) -> Vec<u8> {
    (0..size)
        .map(|i| (i.wrapping_mul(7) ^ (i >> 3)) as u8)
        .collect()
}

#[divan::bench(args = [1024, 65536, 524288, 4194304])]
fn bench_seal_blob(bencher: divan::Bencher, size: usize) {
    let key = SystemCrypto.generate_key().unwrap();
    let nonce = SystemCrypto.generate_nonce().unwrap();
    let aad = blob_aad(1, "bench-blob");
    let data = make_data(size);
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| {
            SystemCrypto
                .aead_encrypt(
                    divan::black_box(&key),
                    divan::black_box(&nonce),
                    &aad,
                    divan::black_box(&data),
                )
                .unwrap()
        });
}

#[divan::bench(args = [1024, 65536, 524288, 4194304])]
fn bench_open_blob(bencher: divan::Bencher, size: usize) {
    let key = SystemCrypto.generate_key().unwrap();
    let nonce = SystemCrypto.generate_nonce().unwrap();
    let aad = blob_aad(1, "bench-blob");
    let sealed = SystemCrypto
        .aead_encrypt(&key, &nonce, &aad, &make_data(size))
        .unwrap();
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| {
            SystemCrypto
                .aead_decrypt(
                    divan::black_box(&key),
                    divan::black_box(&nonce),
                    &aad,
                    divan::black_box(&sealed.ciphertext),
                    &sealed.tag,
                )
                .unwrap()
        });
}

fn main() {
    divan::main();
}
