//! User-facing error translation (presentation boundary).
//!
//! Raw error text is classified by case-insensitive substring into the
//! Portuguese messages the interface shows. Unknown text passes through
//! verbatim; absent input becomes a generic message.

pub const UNKNOWN: &str = "Erro desconhecido";
pub const SESSION_EXPIRED: &str = "Sua sessão expirou. Faça login novamente.";
pub const FORBIDDEN: &str = "Você não tem permissão para executar esta ação.";
pub const NOT_FOUND: &str = "Registro não encontrado.";
pub const DUPLICATE: &str = "Já existe um registro com esses dados.";
pub const LINKED_RECORDS: &str = "Este registro está vinculado a outros dados e não pode ser excluído.";
pub const CONNECTIVITY: &str = "Falha de conexão. Verifique sua internet.";
pub const TIMEOUT: &str = "A operação demorou para responder. Tente novamente.";

/// Translate raw error text into the message shown to the user.
pub fn user_message(raw: Option<&str>) -> String {
    let Some(raw) = raw else {
        return UNKNOWN.to_string();
    };

    let lowered = raw.to_lowercase();
    let contains_any = |needles: &[&str]| needles.iter().any(|n| lowered.contains(n));

    if contains_any(&["jwt", "token"]) {
        SESSION_EXPIRED.to_string()
    } else if contains_any(&["permission", "policy", "row-level security", "rls"]) {
        FORBIDDEN.to_string()
    } else if contains_any(&["not found", "no rows"]) {
        NOT_FOUND.to_string()
    } else if contains_any(&["duplicate", "unique"]) {
        DUPLICATE.to_string()
    } else if contains_any(&["foreign key"]) {
        LINKED_RECORDS.to_string()
    } else if contains_any(&["network", "fetch"]) {
        CONNECTIVITY.to_string()
    } else if contains_any(&["timeout", "timed out"]) {
        TIMEOUT.to_string()
    } else {
        raw.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_input_becomes_the_generic_message() {
        assert_eq!(user_message(None), UNKNOWN);
    }

    #[test]
    fn token_errors_map_to_session_expired() {
        assert_eq!(user_message(Some("Invalid JWT signature")), SESSION_EXPIRED);
        assert_eq!(user_message(Some("refresh TOKEN missing")), SESSION_EXPIRED);
    }

    #[test]
    fn permission_errors_map_to_forbidden() {
        assert_eq!(
            user_message(Some("new row violates row-level security policy")),
            FORBIDDEN
        );
        assert_eq!(user_message(Some("RLS check failed")), FORBIDDEN);
    }

    #[test]
    fn missing_record_errors_map_to_not_found() {
        assert_eq!(user_message(Some("record not found")), NOT_FOUND);
        assert_eq!(user_message(Some("query returned no rows")), NOT_FOUND);
    }

    #[test]
    fn uniqueness_errors_map_to_duplicate() {
        assert_eq!(
            user_message(Some("duplicate key value violates unique constraint")),
            DUPLICATE
        );
    }

    #[test]
    fn foreign_key_errors_map_to_linked_records() {
        assert_eq!(
            user_message(Some("violates foreign key constraint deals_org_fkey")),
            LINKED_RECORDS
        );
    }

    #[test]
    fn transport_errors_map_to_connectivity_and_timeout() {
        assert_eq!(user_message(Some("network unreachable")), CONNECTIVITY);
        assert_eq!(user_message(Some("fetch failed")), CONNECTIVITY);
        assert_eq!(user_message(Some("statement timeout")), TIMEOUT);
    }

    #[test]
    fn matching_is_case_insensitive() {
        assert_eq!(user_message(Some("DUPLICATE KEY")), DUPLICATE);
    }

    #[test]
    fn unknown_text_passes_through_verbatim() {
        assert_eq!(
            user_message(Some("algo inesperado aconteceu")),
            "algo inesperado aconteceu"
        );
    }
}
