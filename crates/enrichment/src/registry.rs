use serde::{Deserialize, Serialize};

use funil_contacts::{Address, EnrichmentData};

/// National-registry lookup result for one CNPJ.
///
/// Field names mirror the registry's payload; `into_enrichment` maps them
/// onto the organization's fields.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RegistryRecord {
    pub cnpj: String,
    pub razao_social: Option<String>,
    pub nome_fantasia: Option<String>,
    pub email: Option<String>,
    pub telefone: Option<String>,
    pub cnae_descricao: Option<String>,
    pub logradouro: Option<String>,
    pub municipio: Option<String>,
    pub uf: Option<String>,
    pub cep: Option<String>,
}

impl RegistryRecord {
    pub fn into_enrichment(self) -> EnrichmentData {
        EnrichmentData {
            legal_name: self.razao_social,
            trade_name: self.nome_fantasia,
            email: self.email,
            phone: self.telefone,
            main_activity: self.cnae_descricao,
            address: Address {
                street: self.logradouro,
                city: self.municipio,
                state: self.uf,
                postal_code: self.cep,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_registry_fields_onto_enrichment_data() {
        let record = RegistryRecord {
            cnpj: "11222333000181".to_string(),
            razao_social: Some("ACME COMERCIO LTDA".to_string()),
            municipio: Some("São Paulo".to_string()),
            uf: Some("SP".to_string()),
            ..Default::default()
        };

        let data = record.into_enrichment();
        assert_eq!(data.legal_name.as_deref(), Some("ACME COMERCIO LTDA"));
        assert_eq!(data.address.city.as_deref(), Some("São Paulo"));
        assert_eq!(data.address.state.as_deref(), Some("SP"));
        assert_eq!(data.email, None);
    }
}
