//! Example: Attesting a trip and rendering the ZoKrates witness
//!
//! Run with: cargo run -p telemetry-core --example attest_sample

use telemetry_core::{
    AttestationMode, Attestor, AttestorSettings, DeviceId, FixedSeed, KeyProvider, MessageEncoder,
    TelemetrySample, TripState, VehicleClass, WitnessBatch,
};

const DEMO_SEED: &str = "1997011358982923168928344992199991480689546837621580239342656433234255379025";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("🛰  Telemetry Attestation - Example Usage\n");
    println!("=========================================\n");

    // Step 1: Key pair (on a device this comes from SecureRandom)
    println!("1️⃣  Deriving key pair from the demo seed...");
    let keys = FixedSeed::from_decimal(DEMO_SEED)?.key_pair()?;
    let public = keys.public_key();
    println!("   ✓ Public key A.x = {}\n", public.x());

    // Step 2: Record a short trip
    println!("2️⃣  Recording fixes...");
    let device = DeviceId("98765".to_string());
    let mut trip = TripState::start(TelemetrySample::new(device.clone(), 47.0, 8.0, 1_717_351_192));
    for i in 1..=3 {
        let fix = TelemetrySample::new(
            device.clone(),
            47.0 + 0.001 * f64::from(i),
            8.0,
            1_717_351_192 + 10 * i64::from(i),
        );
        let segment = trip.advance(fix);
        println!("   Fix {}: +{} m", i, segment);
    }
    println!("   ✓ Total distance: {} m\n", trip.distances.total_m());

    // Step 3: Sign the position layout
    println!("3️⃣  Signing the 512-bit position message...");
    let attestor = Attestor::new(
        keys.clone(),
        MessageEncoder::default(),
        AttestorSettings::new(VehicleClass::Bike, "demo-token"),
    );
    let position = attestor.attest(&trip)?;
    position.verify()?;
    println!("   ✓ Message: {}", hex::encode(position.message.as_bytes()));
    println!("   ✓ Witness: {}\n", position.tokens);

    // Step 4: Sign the distance digest
    println!("4️⃣  Signing the distance digest...");
    let mut settings = AttestorSettings::new(VehicleClass::Bike, "demo-token");
    settings.mode = AttestationMode::DistanceDigest;
    let digest_attestor = Attestor::new(keys, MessageEncoder::default(), settings);
    let distance = digest_attestor.attest(&trip)?;
    println!("   ✓ Preimage: {:?}\n", distance.message.preimage().unwrap_or_default());

    // Step 5: Envelope
    println!("5️⃣  Building the envelope...");
    let envelope = attestor.envelope(&trip, chrono::Utc::now())?;
    println!("   ✓ Event type: {}", envelope.header.event_type);
    println!("   ✓ Protobuf size: {} bytes", envelope.to_protobuf().len());
    println!("   ✓ CBOR size: {} bytes\n", envelope.to_cbor()?.len());

    // Step 6: Grouped witness for a batch proof
    println!("6️⃣  Grouped witness lines for both attestations:");
    let mut batch = WitnessBatch::new();
    batch.push(position.tokens);
    batch.push(distance.tokens);
    for line in batch.grouped_lines().iter().take(6) {
        println!("   {}", line);
    }
    println!("   ...\n");

    println!("✅ Done");
    Ok(())
}
