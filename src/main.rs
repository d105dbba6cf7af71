// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {
    authenticode::{
        config::SigningSpec,
        digest::DigestAlgorithm,
        engine::{self, SignRequest, TimestampRequest},
        error::AuthenticodeError,
        keys::{self, KeyMaterial},
        signing::{JavaPermissionLevel, SigningOptions},
        verify,
    },
    clap::{Arg, ArgGroup, Command},
    log::LevelFilter,
    std::path::Path,
};

fn arg_in(matches: &clap::ArgMatches) -> Result<String, AuthenticodeError> {
    matches
        .value_of("in")
        .map(str::to_string)
        .ok_or_else(|| AuthenticodeError::ArgError("missing input file".into()))
}

fn arg_out(matches: &clap::ArgMatches) -> Result<String, AuthenticodeError> {
    matches
        .value_of("out")
        .map(str::to_string)
        .ok_or_else(|| AuthenticodeError::ArgError("missing output file".into()))
}

fn load_key_material(matches: &clap::ArgMatches) -> Result<KeyMaterial, AuthenticodeError> {
    let password = matches.value_of("pass");

    if let Some(pkcs12_path) = matches.value_of("pkcs12") {
        let data = std::fs::read(pkcs12_path)?;
        return keys::load_pkcs12(&data, password.unwrap_or(""));
    }

    let spc_path = matches
        .value_of("spc")
        .ok_or_else(|| AuthenticodeError::ArgError("`-spc` is required without `-pkcs12`".into()))?;
    let spc_der = std::fs::read(spc_path)?;

    match (matches.value_of("key"), matches.value_of("pvk")) {
        (Some(key_path), None) => {
            let key_data = std::fs::read(key_path)?;
            keys::load_spc_with_key(&spc_der, &key_data)
        }
        (None, Some(pvk_path)) => {
            let pvk_data = std::fs::read(pvk_path)?;
            keys::load_spc_with_pvk(&spc_der, &pvk_data, password)
        }
        _ => Err(AuthenticodeError::ArgError(
            "`-spc` requires exactly one of `-key` or `-pvk`".into(),
        )),
    }
}

fn command_sign(matches: &clap::ArgMatches) -> Result<(), AuthenticodeError> {
    let key_material = load_key_material(matches)?;

    let digest_alg = match matches.value_of("digest") {
        Some(value) => DigestAlgorithm::from_cli_value(value)?,
        None => DigestAlgorithm::default(),
    };

    let java_level = matches
        .value_of("java_permissions")
        .map(JavaPermissionLevel::from_cli_value)
        .transpose()?;
    if matches!(java_level, Some(JavaPermissionLevel::Medium) | Some(JavaPermissionLevel::High)) {
        return Err(AuthenticodeError::ArgError(
            "`-jp medium` and `-jp high` are not supported; only `-jp low` carries attribute bytes"
                .into(),
        ));
    }

    let proxy = matches.value_of("proxy").map(str::to_string);
    let timestamp = match (matches.value_of("timestamp_url"), matches.value_of("rfc3161_url")) {
        (Some(url), None) => TimestampRequest::Authenticode {
            url: url.to_string(),
            proxy,
        },
        (None, Some(url)) => TimestampRequest::Rfc3161 {
            url: url.to_string(),
            proxy,
        },
        (None, None) => TimestampRequest::None,
        (Some(_), Some(_)) => unreachable!("clap ArgGroup enforces -t/-ts mutual exclusion"),
    };

    let options = SigningOptions {
        description: matches.value_of("description").map(str::to_string),
        url: matches.value_of("url").map(str::to_string),
        java_level,
        commercial: matches.is_present("commercial"),
    };

    let request = SignRequest {
        digest_alg,
        key_material: &key_material,
        options,
        timestamp,
    };

    let input = std::fs::read(arg_in(matches)?)?;
    let signed = engine::sign(&input, &request)?;
    std::fs::write(arg_out(matches)?, signed)?;

    Ok(())
}

fn command_extract_signature(matches: &clap::ArgMatches) -> Result<(), AuthenticodeError> {
    let input = std::fs::read(arg_in(matches)?)?;
    let signature = engine::extract_signature(&input)?;
    std::fs::write(arg_out(matches)?, signature)?;
    Ok(())
}

fn command_remove_signature(matches: &clap::ArgMatches) -> Result<(), AuthenticodeError> {
    let input = std::fs::read(arg_in(matches)?)?;
    let stripped = engine::remove_signature(&input)?;
    std::fs::write(arg_out(matches)?, stripped)?;
    Ok(())
}

/// Exit code convention: 0 success, 1 verification mismatch, nonzero on a
/// hard failure (§6). `Ok(true)` means "verification failed cleanly" and
/// should map to exit code 1 without printing `Error: ...`.
fn command_verify(matches: &clap::ArgMatches) -> Result<bool, AuthenticodeError> {
    let path = arg_in(matches)?;
    let data = std::fs::read(&path)?;
    let report = verify::verify(&data)?;

    println!("file: {}", path);
    println!("digest algorithm: {:?}", report.digest_alg);
    println!(
        "digest: stored={} calculated={} ({})",
        hex::encode(&report.stored_digest),
        hex::encode(&report.calculated_digest),
        if report.digest_matches() { "match" } else { "MISMATCH" }
    );
    println!(
        "checksum: stored={:#x} calculated={:#x} ({})",
        report.stored_checksum,
        report.calculated_checksum,
        if report.checksum_matches() { "match" } else { "MISMATCH" }
    );
    println!(
        "signature: {}",
        if report.signature_ok { "valid" } else { "INVALID" }
    );
    if let Some(signer) = report.signers.first() {
        println!("signer: subject={} issuer={}", signer.subject, signer.issuer);
    }
    for cert in &report.certificates {
        println!("certificate: subject={} issuer={}", cert.subject, cert.issuer);
    }
    if let Some(page_hash) = &report.page_hash {
        println!(
            "page hash: algorithm={:?} bytes={}",
            page_hash.digest_alg,
            hex::encode(&page_hash.blob)
        );
    }

    Ok(!report.all_ok())
}

fn command_sign_spec(matches: &clap::ArgMatches) -> Result<(), AuthenticodeError> {
    let path = matches
        .value_of("file")
        .ok_or_else(|| AuthenticodeError::ArgError("missing sign-spec FILE".into()))?;
    let spec = SigningSpec::load(Path::new(path))?;
    let count = authenticode::config::run(&spec)?;
    log::info!("signed {} file(s) from {}", count, path);
    Ok(())
}

fn in_out_args() -> [Arg<'static>; 2] {
    [
        Arg::new("in")
            .long("in")
            .index(1)
            .takes_value(true)
            .required(true)
            .help("Path to the input file"),
        Arg::new("out")
            .long("out")
            .index(2)
            .takes_value(true)
            .required(true)
            .help("Path to the output file"),
    ]
}

fn main_impl() -> Result<i32, AuthenticodeError> {
    let app = Command::new("signcode")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Sign, timestamp, and verify Authenticode PE/CAB/MSI files")
        .arg(
            Arg::new("verbose")
                .short('v')
                .multiple_occurrences(true)
                .global(true)
                .help("Increase logging verbosity (may be repeated)"),
        )
        .subcommand(
            Command::new("sign")
                .about("Sign a PE, CAB, or MSI file")
                .arg(Arg::new("pkcs12").long("pkcs12").visible_alias("pfx").takes_value(true).help("Path to a PKCS#12 (.pfx/.p12) container"))
                .arg(Arg::new("spc").long("spc").takes_value(true).help("Path to an SPC (PKCS#7 certificate bag) file"))
                .arg(Arg::new("key").long("key").takes_value(true).help("Path to a DER/PEM RSA private key, used with `-spc`"))
                .arg(Arg::new("pvk").long("pvk").takes_value(true).help("Path to a Microsoft PVK private key, used with `-spc`"))
                .group(ArgGroup::new("key_source").args(&["pkcs12", "spc"]).required(true))
                .arg(Arg::new("pass").long("pass").takes_value(true).help("Password for the PKCS#12 container or encrypted PVK"))
                .arg(Arg::new("digest").short('h').long("digest").takes_value(true).possible_values(["md5", "sha1", "sha2"]).help("Digest algorithm"))
                .arg(Arg::new("description").short('n').long("description").takes_value(true).help("Program description"))
                .arg(Arg::new("url").short('i').long("url").takes_value(true).help("Program information URL"))
                .arg(Arg::new("java_permissions").long("jp").takes_value(true).possible_values(["low", "medium", "high"]).help("Java permissions (CAB only; only `low` is supported)"))
                .arg(Arg::new("commercial").long("comm").help("Mark the signature as commercial rather than individual"))
                .arg(Arg::new("timestamp_url").short('t').long("timestamp-url").takes_value(true).help("Authenticode timestamp authority URL"))
                .arg(Arg::new("rfc3161_url").long("ts").takes_value(true).help("RFC 3161 timestamp authority URL"))
                .group(ArgGroup::new("timestamp_kind").args(&["timestamp_url", "rfc3161_url"]))
                .arg(Arg::new("proxy").short('p').long("proxy").takes_value(true).help("HTTP(S) proxy to use when contacting a timestamp authority"))
                .args(in_out_args()),
        )
        .subcommand(
            Command::new("extract-signature")
                .about("Extract the WIN_CERTIFICATE blob from a signed PE file")
                .args(in_out_args()),
        )
        .subcommand(
            Command::new("remove-signature")
                .about("Strip the signature from a signed PE file")
                .args(in_out_args()),
        )
        .subcommand(
            Command::new("verify")
                .about("Verify a PE file's embedded Authenticode signature")
                .arg(
                    Arg::new("in")
                        .long("in")
                        .index(1)
                        .takes_value(true)
                        .required(true)
                        .help("Path to the PE file to verify"),
                ),
        )
        .subcommand(
            Command::new("sign-spec")
                .about("Sign a batch of files described by a YAML configuration")
                .arg(Arg::new("file").index(1).takes_value(true).required(true).help("Path to the sign-spec YAML file")),
        );

    let matches = app.get_matches();

    let log_level = match matches.occurrences_of("verbose") {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level.as_str()));
    if log_level <= LevelFilter::Info {
        builder.format_timestamp(None).format_level(false).format_target(false);
    }
    builder.init();

    let (subcommand, args) = matches
        .subcommand()
        .ok_or_else(|| AuthenticodeError::ArgError("no subcommand given".into()))?;

    // Commands that write an output file get it unlinked on a hard failure
    // (§7 "Propagation"): the output is opened write-truncate, so a failure
    // partway through signing/injection must not leave a corrupt file behind.
    let out_path = matches!(subcommand, "sign" | "extract-signature" | "remove-signature")
        .then(|| args.value_of("out").map(str::to_string))
        .flatten();

    let result = match subcommand {
        "sign" => command_sign(args).map(|_| 0),
        "extract-signature" => command_extract_signature(args).map(|_| 0),
        "remove-signature" => command_remove_signature(args).map(|_| 0),
        "verify" => command_verify(args).map(|failed| if failed { 1 } else { 0 }),
        "sign-spec" => command_sign_spec(args).map(|_| 0),
        _ => unreachable!("clap restricts subcommand to the set registered above"),
    };

    if result.is_err() {
        if let Some(path) = out_path {
            let _ = std::fs::remove_file(path);
        }
    }

    result
}

fn main() {
    let exit_code = match main_impl() {
        Ok(0) => {
            println!("Succeeded");
            0
        }
        Ok(code) => {
            println!("Failed");
            code
        }
        Err(err) => {
            eprintln!("Error: {}", err);
            println!("Failed");
            -1
        }
    };

    std::process::exit(exit_code)
}
