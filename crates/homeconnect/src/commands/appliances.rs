//! Appliance command handlers.

use tabled::Tabled;

use homeconnect_core::{Appliance, HomeConnectClient};

use crate::cli::{AppliancesArgs, AppliancesCommand, GlobalOpts};
use crate::error::CliError;
use crate::output::Printer;

// ── Table row ───────────────────────────────────────────────────────

#[derive(Tabled)]
struct ApplianceRow {
    #[tabled(rename = "haId")]
    ha_id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Type")]
    kind: String,
    #[tabled(rename = "Brand")]
    brand: String,
    #[tabled(rename = "Connected")]
    connected: String,
}

impl From<&Appliance> for ApplianceRow {
    fn from(a: &Appliance) -> Self {
        Self {
            ha_id: a.ha_id.clone(),
            name: a.name.clone(),
            kind: a.kind.clone(),
            brand: a.brand.clone(),
            connected: if a.connected { "yes" } else { "no" }.into(),
        }
    }
}

fn detail(a: &Appliance) -> String {
    [
        format!("haId:      {}", a.ha_id),
        format!("Name:      {}", a.name),
        format!("Type:      {}", a.kind),
        format!("Brand:     {}", a.brand),
        format!("Model:     {}", a.vib),
        format!("E-Nr:      {}", a.enumber),
        format!("Connected: {}", a.connected),
    ]
    .join("\n")
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(
    client: &HomeConnectClient,
    args: AppliancesArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let printer = Printer::new(global);
    match args.command {
        AppliancesCommand::List => {
            let appliances = client.list_appliances().await?;
            let out =
                printer.records(&appliances, |a| ApplianceRow::from(a), |a| a.ha_id.as_str())?;
            printer.emit(&out);
            Ok(())
        }

        AppliancesCommand::Get { ha_id } => {
            let appliance = client.appliance(&ha_id).await.map_err(|e| match e {
                homeconnect_core::CoreError::NotFound { .. } => CliError::NotFound {
                    resource_type: "appliance".into(),
                    identifier: ha_id.clone(),
                    list_command: "appliances list".into(),
                },
                other => other.into(),
            })?;
            printer.emit(&printer.record(&appliance, detail, |a| a.ha_id.as_str())?);
            Ok(())
        }
    }
}
