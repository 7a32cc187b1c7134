use tinybatch::tournament::{queue_standing, queue_tournament, Standing, Tournament, TournamentSchema};
use tinybatch::{batch_operations, Config, DbResult, SledStore};
use tracing_subscriber::EnvFilter;

fn fetched() -> Vec<(Tournament, Vec<Standing>)> {
    let tags = ["Sonix", "MkLeo", "Tweek", "Light", "Sparg0", "Riddles", "Glutonny", "acola"];

    (0..3)
        .map(|n| {
            let tournament = Tournament {
                id: format!("78{n}"),
                name: format!("Weekly #{n}"),
                num_attendees: 48 + n,
                city: Some("Toronto".to_owned()),
                country_code: Some("CA".to_owned()),
                slug: Some(format!("tournament/weekly-{n}")),
                state: 3,
                ..Default::default()
            };

            let standings = tags
                .iter()
                .enumerate()
                .map(|(place, tag)| Standing {
                    tournament_id: tournament.id.clone(),
                    // One entrant without a start.gg account.
                    startgg_id: if place == 7 { String::new() } else { format!("{}", 1000 + place) },
                    gamer_tag: (*tag).to_owned(),
                    name: None,
                    placement: place as i64 + 1,
                    event_name: "Ultimate Singles".to_owned(),
                    event_id: format!("{}-singles", tournament.id),
                })
                .collect();

            (tournament, standings)
        })
        .collect()
}

fn main() -> DbResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,tinybatch=debug")),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    let store = SledStore::open(&config.store)?;
    let schema = TournamentSchema::new();

    let output = batch_operations(&store, config.queue.page_size, |queue| -> DbResult<usize> {
        let mut skipped = 0;
        for (tournament, standings) in fetched() {
            queue_tournament(queue, &schema, &tournament, 1_700_000_000);
            for standing in &standings {
                if !queue_standing(queue, &schema, standing) {
                    skipped += 1;
                }
            }
        }
        Ok(skipped)
    })?;

    println!("skipped standings: {}", output.value);
    println!("{:#?}", output.stats);
    println!(
        "tournaments: {}, players: {}, placements: {}",
        store.count(&schema.tournaments)?,
        store.count(&schema.players)?,
        store.count(&schema.placements)?
    );

    Ok(())
}
