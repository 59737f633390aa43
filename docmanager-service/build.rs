fn main() {
    // PDFium is bound at runtime when the workers extract text, from:
    // 1. Current directory
    // 2. vendor/pdfium/lib/
    // 3. System library paths
    println!("cargo:rerun-if-changed=build.rs");
}
