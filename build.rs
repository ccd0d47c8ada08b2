/// Build script para proyectos ESP-IDF.
///
/// `embuild::espidf::sysenv::output()` hace todo el trabajo pesado:
/// 1. Detecta o descarga el ESP-IDF SDK (framework C de Espressif)
/// 2. Configura las variables de entorno para el cross-compiler
/// 3. Genera los bindings de C → Rust
/// 4. Compila el SDK de C y lo linkea con tu código Rust
///
/// En el host (cargo test del núcleo) no hay SDK que configurar,
/// así que solo lo invocamos cuando el target es ESP-IDF.
fn main() {
    println!("cargo:rerun-if-env-changed=RTDB_BASE_URL");
    println!("cargo:rerun-if-env-changed=AP_SSID");
    println!("cargo:rerun-if-env-changed=AP_PASSWORD");

    if std::env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("espidf") {
        embuild::espidf::sysenv::output();
    }
}
