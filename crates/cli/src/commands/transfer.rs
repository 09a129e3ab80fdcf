//! Multi-signature transfer commands.

use anyhow::Result;

use common::{
    CancelTransferResponse, InitiateTransferRequest, InitiateTransferResponse,
    SignTransferRequest, SignTransferResponse, TransferHistoryResponse, TransferProposal,
    TransferStatusResponse, UnconfirmedTransfersResponse,
};

use crate::client::RegistryClient;

fn print_transfer(transfer: &TransferProposal) {
    println!("  Property:   {}", transfer.property_id);
    println!("  From:       {}", transfer.current_owner);
    println!("  To:         {}", transfer.new_owner);
    println!("  Status:     {}", transfer.status.as_str());
    println!("  Signers:    {}", transfer.required_signers.join(", "));
    if transfer.provided_signatures.is_empty() {
        println!("  Signed by:  (none yet)");
    } else {
        let signed: Vec<&str> = transfer
            .provided_signatures
            .iter()
            .map(|s| s.signer.as_str())
            .collect();
        println!("  Signed by:  {}", signed.join(", "));
    }
    println!("  Expires:    {}", transfer.expires_at.to_rfc3339());
    println!("  Initiated:  {} by {}", transfer.created_at.to_rfc3339(), transfer.initiated_by);
    if let Some(tx_ref) = &transfer.external_tx_ref {
        println!("  Ledger tx:  {}", tx_ref);
    }
}

/// Initiate a multi-signature transfer.
pub async fn initiate_transfer(
    client: &RegistryClient,
    id: &str,
    to: &str,
    signers: Vec<String>,
    window_days: Option<u32>,
) -> Result<()> {
    let request = InitiateTransferRequest {
        new_owner: to.to_string(),
        required_signers: signers,
        window_days,
    };

    let response: InitiateTransferResponse = client
        .post(&format!("/property/{}/transfer", id), &request)
        .await?;

    println!("Transfer Initiated");
    println!("==================");
    println!("  Reference:  {}", response.transfer_ref);
    print_transfer(&response.transfer);
    println!();
    println!(
        "Waiting for {} signature(s). Signers run:",
        response.transfer.remaining_signatures()
    );
    println!("  landreg transfer sign --id {} --token <wallet-token>", id);

    Ok(())
}

/// Sign the pending transfer for a property.
pub async fn sign_transfer(client: &RegistryClient, id: &str, token: &str) -> Result<()> {
    let request = SignTransferRequest {
        token: token.to_string(),
    };

    let response: SignTransferResponse = client
        .post(&format!("/property/{}/transfer/sign", id), &request)
        .await?;

    if response.completed {
        println!("Transfer Completed");
        println!("==================");
        print_transfer(&response.transfer);
        match response.execution_tx_ref {
            Some(tx_ref) => println!("  Execute tx: {}", tx_ref),
            None => println!("  Execute tx: (pending, awaiting ledger confirmation)"),
        }
    } else {
        println!("Signature Recorded");
        println!("==================");
        print_transfer(&response.transfer);
        println!();
        println!("{} signature(s) still required.", response.remaining_signatures);
    }

    Ok(())
}

/// Cancel the pending transfer for a property.
pub async fn cancel_transfer(client: &RegistryClient, id: &str) -> Result<()> {
    let response: CancelTransferResponse = client
        .post_empty(&format!("/property/{}/transfer/cancel", id))
        .await?;

    println!("Transfer Cancelled");
    println!("==================");
    print_transfer(&response.transfer);

    Ok(())
}

/// Show the latest transfer for a property.
pub async fn transfer_status(client: &RegistryClient, id: &str) -> Result<()> {
    let response: TransferStatusResponse =
        client.get(&format!("/property/{}/transfer", id)).await?;

    println!("Transfer Status");
    println!("===============");
    print_transfer(&response.transfer);
    println!("  Remaining:  {} signature(s)", response.remaining_signatures);
    if response.time_remaining_ms > 0 {
        let hours = response.time_remaining_ms / 3_600_000;
        println!("  Time left:  ~{}h", hours);
    }

    Ok(())
}

/// Show all transfers ever proposed for a property.
pub async fn transfer_history(client: &RegistryClient, id: &str) -> Result<()> {
    let response: TransferHistoryResponse =
        client.get(&format!("/property/{}/transfers", id)).await?;

    println!("Transfer History for {}", response.property_id);
    println!("====================");

    if response.transfers.is_empty() {
        println!("  No transfers proposed yet.");
    } else {
        for transfer in &response.transfers {
            println!();
            print_transfer(transfer);
        }
        println!();
        println!("Total: {} transfer(s)", response.transfers.len());
    }

    Ok(())
}

/// List terminal transfers awaiting ledger confirmation.
pub async fn unconfirmed_transfers(client: &RegistryClient) -> Result<()> {
    let response: UnconfirmedTransfersResponse = client.get("/transfers/unconfirmed").await?;

    println!("Unconfirmed Transfers");
    println!("=====================");

    if response.transfers.is_empty() {
        println!("  Everything is confirmed on the ledger.");
    } else {
        for transfer in &response.transfers {
            println!();
            print_transfer(transfer);
        }
        println!();
        println!(
            "{} transfer(s) await ledger reconciliation.",
            response.transfers.len()
        );
    }

    Ok(())
}
