//! Fixed neighborhood centroids — the final geocoding fallback tier.
//!
//! Coverage: the ~50 neighborhoods recognized by IBGE / the Niterói city
//! government, with coordinates estimated from OpenStreetMap. Tolerance of
//! roughly ±300 m is acceptable for street-level aggregation. The table is
//! static on purpose: an unknown neighborhood is a resolution failure, never
//! auto-inserted.

/// `(neighborhood, latitude, longitude)` — title-cased names as they appear
/// after consolidation.
pub const NEIGHBORHOOD_CENTROIDS: &[(&str, f64, f64)] = &[
    // Zona Sul / shoreline
    ("Icaraí", -22.9043, -43.1199),
    ("São Francisco", -22.9307, -43.1229),
    ("Charitas", -22.9471, -43.1282),
    ("Jurujuba", -22.9458, -43.1202),
    ("Boa Viagem", -22.9179, -43.1165),
    ("Gragoatá", -22.8970, -43.1281),
    ("Ponta D'Areia", -22.9024, -43.1254),
    ("Preventório", -22.9371, -43.1258),
    ("Maceió", -22.9310, -43.1065),
    ("Sapê", -22.9188, -43.0859),
    // Central area
    ("Centro", -22.8971, -43.1152),
    ("Ingá", -22.9031, -43.1168),
    ("São Domingos", -22.9103, -43.1069),
    ("Vital Brazil", -22.9174, -43.1062),
    ("Largo Da Batalha", -22.9021, -43.1053),
    ("Santa Rosa", -22.9121, -43.0998),
    ("Jardim Icaraí", -22.9107, -43.1209),
    ("Morro Do Estado", -22.8958, -43.1131),
    ("Ilha Da Conceição", -22.8905, -43.1157),
    ("Jacaré", -22.9082, -43.1168),
    // Zona Norte / inland
    ("Fonseca", -22.8808, -43.0828),
    ("Barreto", -22.8669, -43.0914),
    ("Santana", -22.8905, -43.1001),
    ("Pé Pequeno", -22.8931, -43.0991),
    ("Cubango", -22.8853, -43.0918),
    ("Caramujo", -22.8850, -43.0811),
    ("Tenente Jardim", -22.8809, -43.0985),
    ("Cantagalo", -22.8760, -43.0968),
    ("Neves", -22.8629, -43.0965),
    ("Mutondo", -22.8673, -43.0884),
    ("Serra Grande", -22.8643, -43.0817),
    ("Palmeira", -22.8700, -43.0884),
    ("Baldeador", -22.8556, -43.0845),
    ("Maria Paula", -22.8565, -43.0799),
    ("Colubandê", -22.8605, -43.0744),
    ("Rio Vermelho", -22.8543, -43.0704),
    ("Rio Do Ouro", -22.8640, -43.0660),
    ("Cafubá", -22.8734, -43.0481),
    ("Pendotiba", -22.8871, -43.0486),
    ("Várzea Das Moças", -22.8709, -43.1093),
    ("Divina Providência", -22.8744, -43.0866),
    ("Niterolandia", -22.8612, -43.0649),
    ("Matapaca", -22.8481, -43.1007),
    ("Sampaio", -22.9068, -43.0820),
    // Região Oceânica
    ("Piratininga", -22.9485, -43.0697),
    ("Itaipu", -22.9523, -43.0611),
    ("Itacoatiara", -22.9611, -43.0543),
    ("Camboinhas", -22.9647, -43.0622),
    ("Maravista", -22.9405, -43.0705),
    ("Engenho Do Mato", -22.9354, -43.0605),
];

/// Look up the fixed centroid for a neighborhood. Exact match first, then
/// case-insensitive.
pub fn centroid_for(neighborhood: &str) -> Option<(f64, f64)> {
    let name = neighborhood.trim();
    if name.is_empty() {
        return None;
    }
    for (known, lat, lon) in NEIGHBORHOOD_CENTROIDS {
        if *known == name {
            return Some((*lat, *lon));
        }
    }
    let lower = name.to_lowercase();
    for (known, lat, lon) in NEIGHBORHOOD_CENTROIDS {
        if known.to_lowercase() == lower {
            return Some((*lat, *lon));
        }
    }
    None
}
