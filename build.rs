fn main() {
    // ── macOS: embed Info.plist so CoreBluetooth grants Bluetooth access ──────
    //
    // CBCentralManager refuses to scan (state stays "unauthorised") unless the
    // running binary carries an Info.plist with
    // NSBluetoothAlwaysUsageDescription, which a plain cargo-built CLI binary
    // does not. Sticking the plist into the
    //   __TEXT,__info_plist
    // section of the Mach-O via the linker `-sectcreate` flag lets the
    // linkband CLI pass that check without shipping an app bundle.
    //
    // `CARGO_CFG_TARGET_OS` reflects the *target* (not the host), so a
    // Linux → macOS cross-build gets the section too.
    if std::env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("macos") {
        let dir = std::env::var("CARGO_MANIFEST_DIR")
            .expect("CARGO_MANIFEST_DIR must be set by Cargo");

        let plist = format!("{dir}/Info.plist");

        // One rustc-link-arg per linker argument:
        //   ld … -sectcreate __TEXT __info_plist /path/to/Info.plist …
        println!("cargo:rustc-link-arg=-sectcreate");
        println!("cargo:rustc-link-arg=__TEXT");
        println!("cargo:rustc-link-arg=__info_plist");
        println!("cargo:rustc-link-arg={plist}");

        println!("cargo:rerun-if-changed=Info.plist");
    }
}
