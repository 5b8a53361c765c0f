//! Demo command: a full passkey lifecycle against an in-memory relying party.

use anyhow::{bail, Context, Result};
use clap::ValueEnum;
use colored::Colorize;
use passgate_core::encoding::base64url_encode;
use passgate_core::{
    AttestationMode, CoseAlgorithm, RelyingParty, RelyingPartyConfig, SoftAuthenticator,
    UserIdentity,
};
use tracing::info;
use url::Url;

/// Attestation the soft authenticator should produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AttestationArg {
    None,
    Packed,
    PackedCert,
    FidoU2f,
}

impl From<AttestationArg> for AttestationMode {
    fn from(arg: AttestationArg) -> Self {
        match arg {
            AttestationArg::None => AttestationMode::None,
            AttestationArg::Packed => AttestationMode::PackedSelf,
            AttestationArg::PackedCert => AttestationMode::PackedCertificate,
            AttestationArg::FidoU2f => AttestationMode::FidoU2f,
        }
    }
}

pub struct DemoOptions {
    pub algorithm: CoseAlgorithm,
    pub attestation: AttestationArg,
    pub rounds: u32,
    pub rp_id: String,
    pub origin: String,
    /// Roll the authenticator's counter back before the last round
    pub clone_last: bool,
}

/// Execute the demo command.
pub async fn execute(options: DemoOptions, quiet: bool) -> Result<()> {
    if options.rounds == 0 {
        bail!("--rounds must be at least 1");
    }

    let origin_url = Url::parse(&options.origin)
        .with_context(|| format!("Invalid origin: {}", options.origin))?;
    let config = RelyingPartyConfig::new(&options.rp_id, &origin_url, "Passgate Demo")
        .context("Invalid relying party configuration")?;
    let origin = origin_url.origin().ascii_serialization();

    let rp = RelyingParty::in_memory(config);
    let mut authenticator =
        SoftAuthenticator::new(options.algorithm).with_attestation(options.attestation.into());
    let user = UserIdentity::new("demo-user").with_display_name("Demo User");

    info!(rp_id = %options.rp_id, origin = %origin, algorithm = %options.algorithm, "Starting demo");

    // Registration
    let creation = rp
        .start_registration(&user)
        .await
        .context("Failed to start registration")?;
    let response = authenticator
        .make_credential(&creation, &origin)
        .context("Authenticator failed to create a credential")?;
    let credential = rp
        .complete_registration(
            &response.request_id,
            &response.client_data_json,
            &response.attestation_object,
        )
        .await
        .context("Registration verification failed")?;

    if !quiet {
        println!();
        println!("{}", "Registered".green().bold());
        println!(
            "   {} {}",
            "Credential:".dimmed(),
            base64url_encode(&credential.credential_id)
        );
        println!("   {} {}", "Algorithm:".dimmed(), credential.public_key.algorithm);
        println!("   {} {}", "Attestation:".dimmed(), credential.attestation_format);
        println!(
            "   {} {}",
            "User handle:".dimmed(),
            base64url_encode(&credential.user_handle)
        );
    }

    // Authentication rounds
    for round in 1..=options.rounds {
        let request = rp
            .start_authentication(Some(&user.name))
            .await
            .context("Failed to start authentication")?;

        if options.clone_last && round == options.rounds {
            authenticator.set_sign_count(&credential.credential_id, 0);
        }

        let assertion = authenticator
            .get_assertion(&request, &origin)
            .context("Authenticator failed to produce an assertion")?;
        let result = rp
            .complete_authentication(
                &assertion.request_id,
                &assertion.credential_id,
                &assertion.client_data_json,
                &assertion.authenticator_data,
                &assertion.signature,
            )
            .await
            .with_context(|| format!("Authentication verification failed in round {round}"))?;

        if !quiet {
            println!(
                "{} {} {}",
                format!("Authenticated (round {round})").green().bold(),
                "sign count".dimmed(),
                result.sign_count
            );
        }
    }

    if !quiet {
        println!();
        println!("{}", "╔════════════════════════════════════════╗".green());
        println!("{}", "║           CEREMONIES PASSED            ║".green().bold());
        println!("{}", "╚════════════════════════════════════════╝".green());
        println!();
    }
    Ok(())
}
