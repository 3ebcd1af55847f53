//! suitgen CLI - key generation, manifest building, signing and inspection.

use chrono::Utc;
use clap::{Parser, Subcommand};
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use suitgen::{
    config::{BuildConfig, OffsetList, SigningConfig},
    cose, wire, DeviceIdentity, Key, Manifest, PublicKey, SignedEnvelope, SigningKey, Value,
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "suitgen")]
#[command(about = "Build, encode and sign firmware-update manifests", long_about = None)]
struct Cli {
    /// Log filter (trace, debug, info, warn, error). RUST_LOG takes precedence.
    #[arg(long, default_value = "warn", global = true)]
    log_level: String,

    /// Shortcut for --log-level debug
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate an Ed25519 signing key
    Keygen {
        /// Directory to write the key files into
        #[arg(short = 'd', long = "dir", default_value = ".")]
        dir: PathBuf,

        /// Write raw key bytes (secret.key / public.key) instead of PEM
        #[arg(long)]
        raw: bool,

        /// Overwrite existing files
        #[arg(short, long)]
        force: bool,
    },

    /// Build a manifest from a template and one file per slot
    Manifest {
        /// YAML build configuration; flags override its values
        #[arg(short = 'c', long = "config")]
        config: Option<PathBuf>,

        /// Manifest template (JSON, or YAML by extension)
        #[arg(short = 't', long = "template")]
        template: Option<PathBuf>,

        /// Root the image uris are built from
        #[arg(short = 'u', long = "urlroot")]
        url_root: Option<String>,

        /// Comma-separated slot offsets, decimal or 0x-prefixed hex
        #[arg(short = 'O', long = "offsets")]
        offsets: Option<String>,

        /// Sequence number of the new manifest
        #[arg(short = 's', long = "seqnr")]
        sequence_number: Option<u64>,

        /// Vendor name the vendor id is derived from
        #[arg(short = 'V', long = "uuid-vendor")]
        vendor: Option<String>,

        /// Class name the class id is derived from
        #[arg(short = 'C', long = "uuid-class")]
        class: Option<String>,

        /// Sign the manifest with this key (PEM, DER or raw)
        #[arg(short = 'k', long = "key", requires = "key_id")]
        key: Option<PathBuf>,

        /// Key id for the protected header
        #[arg(long = "kid", requires = "key")]
        key_id: Option<String>,

        /// Output file; hex on stdout when omitted
        #[arg(short = 'o', long = "output")]
        output: Option<PathBuf>,

        /// Slot files, in slot order
        slot_files: Vec<PathBuf>,
    },

    /// Wrap an already-encoded payload in a signed envelope
    Sign {
        /// Signing key (PEM, DER or raw)
        #[arg(short = 'k', long = "key", required = true)]
        key: PathBuf,

        /// Key id for the protected header
        #[arg(long = "kid", required = true)]
        key_id: String,

        /// Output file; hex on stdout when omitted
        #[arg(short = 'o', long = "output")]
        output: Option<PathBuf>,

        /// Payload file. Use - to read from stdin.
        payload: String,
    },

    /// Sign an epoch timestamp (defaults to now)
    SignTime {
        #[arg(short = 'k', long = "key", required = true)]
        key: PathBuf,

        #[arg(long = "kid", required = true)]
        key_id: String,

        /// Seconds since the Unix epoch
        #[arg(long = "at")]
        at: Option<i64>,

        #[arg(short = 'o', long = "output")]
        output: Option<PathBuf>,
    },

    /// Verify a signed envelope and, optionally, device acceptance
    Verify {
        /// Public key (PEM, DER or raw)
        #[arg(short = 'p', long = "public-key", required = true)]
        public_key: PathBuf,

        /// Vendor name the device was provisioned with
        #[arg(short = 'V', long = "uuid-vendor", requires = "class")]
        vendor: Option<String>,

        /// Class name the device was provisioned with
        #[arg(short = 'C', long = "uuid-class", requires = "vendor")]
        class: Option<String>,

        /// Sequence number currently installed on the device
        #[arg(long = "current-seqnr", default_value_t = 0)]
        current_sequence: u64,

        /// Envelope file. Use - to read from stdin.
        envelope: String,
    },

    /// Print the contents of a manifest or signed envelope
    Inspect {
        /// Output as JSON
        #[arg(long)]
        json: bool,

        /// Input is URL-safe base64 text instead of raw bytes
        #[arg(long)]
        base64: bool,

        /// File to inspect. Use - to read from stdin.
        input: String,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { cli.log_level.as_str() };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(io::stderr),
        )
        .init();

    match cli.command {
        Commands::Keygen { dir, raw, force } => handle_keygen(&dir, raw, force),
        Commands::Manifest {
            config,
            template,
            url_root,
            offsets,
            sequence_number,
            vendor,
            class,
            key,
            key_id,
            output,
            slot_files,
        } => {
            let overrides = BuildConfig {
                template,
                url_root,
                images: slot_files,
                offsets: offsets.map(OffsetList::Text),
                sequence_number,
                vendor,
                class,
                signing: key
                    .zip(key_id)
                    .map(|(key, key_id)| SigningConfig { key, key_id }),
                output,
            };
            let config = match config {
                Some(path) => BuildConfig::from_file(path)?.merge(overrides),
                None => overrides,
            };
            handle_manifest(&config)
        }
        Commands::Sign {
            key,
            key_id,
            output,
            payload,
        } => handle_sign(&key, &key_id, output.as_deref(), &payload),
        Commands::SignTime {
            key,
            key_id,
            at,
            output,
        } => handle_sign_time(&key, &key_id, at, output.as_deref()),
        Commands::Verify {
            public_key,
            vendor,
            class,
            current_sequence,
            envelope,
        } => {
            let device = vendor
                .zip(class)
                .map(|(vendor, class)| DeviceIdentity::derive(&vendor, &class));
            handle_verify(&public_key, device, current_sequence, &envelope)
        }
        Commands::Inspect {
            json,
            base64,
            input,
        } => handle_inspect(json, base64, &input),
    }
}

// ============================================================================
// Command handlers
// ============================================================================

fn handle_keygen(dir: &Path, raw: bool, force: bool) -> Result<(), Box<dyn std::error::Error>> {
    let key = SigningKey::generate();
    let public_key = key.public_key();

    let (private_path, public_path) = if raw {
        (dir.join("secret.key"), dir.join("public.key"))
    } else {
        (dir.join("signing.pem"), dir.join("public.pem"))
    };

    if !force && (private_path.exists() || public_path.exists()) {
        return Err(format!(
            "Files exist: {} or {}. Use --force to overwrite.",
            private_path.display(),
            public_path.display()
        )
        .into());
    }

    if raw {
        fs::write(&private_path, key.secret_key_bytes())?;
        fs::write(&public_path, public_key.to_bytes())?;
    } else {
        fs::write(&private_path, key.to_pem()?)?;
        fs::write(&public_path, public_key.to_pem()?)?;
    }

    eprintln!(
        "Created {} and {}",
        private_path.display(),
        public_path.display()
    );
    println!("{}", hex::encode(public_key.to_bytes()));
    Ok(())
}

fn handle_manifest(config: &BuildConfig) -> Result<(), Box<dyn std::error::Error>> {
    let manifest = config.manifest_builder()?.build()?;
    let encoded = manifest.encode()?;

    let bytes = match &config.signing {
        Some(signing) => {
            let key = SigningKey::from_file(&signing.key)?;
            let envelope = cose::sign(&encoded, signing.key_id.as_bytes(), &key)?;
            info!(
                kid = %signing.key_id,
                key = %key.public_key().fingerprint(),
                "Manifest signed"
            );
            envelope.to_bytes()?
        }
        None => encoded,
    };

    write_output(config.output.as_deref(), &bytes)
}

fn handle_sign(
    key: &Path,
    key_id: &str,
    output: Option<&Path>,
    payload: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let key = SigningKey::from_file(key)?;
    let payload = read_input(payload)?;

    // Only canonical payloads are signed
    if !wire::is_canonical(&payload)? {
        return Err("payload is not canonically encoded".into());
    }

    let envelope = cose::sign(&payload, key_id.as_bytes(), &key)?;
    info!(kid = %key_id, payload_len = payload.len(), "Payload signed");
    write_output(output, &envelope.to_bytes()?)
}

fn handle_sign_time(
    key: &Path,
    key_id: &str,
    at: Option<i64>,
    output: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let key = SigningKey::from_file(key)?;
    let now = at.unwrap_or_else(|| Utc::now().timestamp());
    let envelope = cose::sign_timestamp(now, key_id.as_bytes(), &key)?;
    info!(kid = %key_id, time = now, "Timestamp signed");
    write_output(output, &envelope.to_bytes()?)
}

fn handle_verify(
    public_key: &Path,
    device: Option<DeviceIdentity>,
    current_sequence: u64,
    envelope: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let public_key = PublicKey::from_file(public_key)?;
    let envelope = SignedEnvelope::from_bytes(&read_input(envelope)?)?;
    let header = envelope.protected_header()?;

    if let Err(e) = envelope.verify(&public_key) {
        eprintln!("INVALID: {}", e);
        return Err(e.into());
    }

    if let Some(device) = device {
        let manifest = Manifest::decode(envelope.payload())?;
        if let Err(e) = manifest.check(&device, current_sequence) {
            eprintln!("REJECTED: {}", e);
            return Err(e.into());
        }
        eprintln!("ACCEPTED: sequence number {}", manifest.sequence_number());
    }

    eprintln!("VALID");
    eprintln!("Key id:      {}", String::from_utf8_lossy(&header.key_id));
    eprintln!("Signer:      {}", public_key.fingerprint());
    Ok(())
}

fn handle_inspect(json: bool, base64: bool, input: &str) -> Result<(), Box<dyn std::error::Error>> {
    let mut data = read_input(input)?;
    if base64 {
        data = wire::decode_base64(std::str::from_utf8(&data)?)?;
    }

    // An envelope is a 4-element array; anything else is treated as a bare manifest
    let (envelope, payload) = match SignedEnvelope::from_bytes(&data) {
        Ok(envelope) => {
            let payload = envelope.payload().to_vec();
            (Some(envelope), payload)
        }
        Err(_) => (None, data),
    };

    let value = wire::decode(&payload)?;
    let manifest = Manifest::from_value(&value).ok();

    if json {
        let mut info = serde_json::json!({
            "canonical": wire::is_canonical(&payload)?,
            "payload": value_to_json(&value),
        });
        if let Some(envelope) = &envelope {
            let header = envelope.protected_header()?;
            info["algorithm"] = serde_json::json!(header.algorithm.cose_id());
            info["kid"] = serde_json::json!(String::from_utf8_lossy(&header.key_id));
            info["signature"] = serde_json::json!(hex::encode(envelope.signature()));
        }
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    if let Some(envelope) = &envelope {
        let header = envelope.protected_header()?;
        println!("ENVELOPE");
        println!("──────────────────────────────────────────────────");
        println!("Algorithm:   {:?} ({})", header.algorithm, header.algorithm.cose_id());
        println!("Key id:      {}", String::from_utf8_lossy(&header.key_id));
        println!("Signature:   {}", hex::encode(envelope.signature()));
        println!();
    }

    match manifest {
        Some(manifest) => print_manifest(&manifest),
        None => {
            println!("PAYLOAD");
            println!("──────────────────────────────────────────────────");
            println!("{}", serde_json::to_string_pretty(&value_to_json(&value))?);
        }
    }
    Ok(())
}

fn print_manifest(manifest: &Manifest) {
    println!("MANIFEST v{}", manifest.version());
    println!("──────────────────────────────────────────────────");
    println!("Sequence:    {}", manifest.sequence_number());
    if let Some(vendor) = manifest.vendor_id() {
        println!("Vendor id:   {}", vendor.simple());
    }
    if let Some(class) = manifest.class_id() {
        println!("Class id:    {}", class.simple());
    }
    for (index, component) in manifest.components().iter().enumerate() {
        println!(
            "Component {}: {}",
            index,
            component.identifier().unwrap_or("(unnamed)")
        );
        for (slot, image) in component.images().iter().enumerate() {
            println!("  [{}] {}", slot, image.uri());
            println!("      size:   {}", image.size());
            if let Some(offset) = image.offset() {
                println!("      offset: {:#x}", offset);
            }
            println!("      digest: {}", image.digest().to_hex());
        }
    }
    println!("──────────────────────────────────────────────────");
}

// ============================================================================
// Helpers
// ============================================================================

fn read_input(input: &str) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    if input == "-" {
        let mut buf = Vec::new();
        io::stdin().read_to_end(&mut buf)?;
        Ok(buf)
    } else {
        fs::read(input).map_err(|e| format!("failed to read {}: {}", input, e).into())
    }
}

fn write_output(output: Option<&Path>, bytes: &[u8]) -> Result<(), Box<dyn std::error::Error>> {
    match output {
        Some(path) => {
            fs::write(path, bytes).map_err(|e| format!("failed to write {}: {}", path.display(), e))?;
            eprintln!("Wrote {} bytes to {}", bytes.len(), path.display());
        }
        None => {
            let mut stdout = io::stdout().lock();
            writeln!(stdout, "{}", hex::encode(bytes))?;
        }
    }
    Ok(())
}

fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Integer(i) => match (i64::try_from(*i), u64::try_from(*i)) {
            (Ok(n), _) => serde_json::json!(n),
            (_, Ok(n)) => serde_json::json!(n),
            _ => serde_json::json!(i.to_string()),
        },
        Value::Bytes(b) => serde_json::json!(format!("h'{}'", hex::encode(b))),
        Value::Text(s) => serde_json::json!(s),
        Value::Array(items) => serde_json::Value::Array(items.iter().map(value_to_json).collect()),
        Value::Map(entries) => serde_json::Value::Object(
            entries
                .iter()
                .map(|(k, v)| {
                    let key = match k {
                        Key::Int(i) => i.to_string(),
                        Key::Text(s) => s.clone(),
                    };
                    (key, value_to_json(v))
                })
                .collect(),
        ),
        Value::Tag(tag, inner) => {
            let mut tagged = serde_json::Map::new();
            tagged.insert(format!("tag({})", tag), value_to_json(inner));
            serde_json::Value::Object(tagged)
        }
    }
}
